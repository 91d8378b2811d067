use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use mediabuf_heap::error::{Error as HeapError, Result as HeapResult};
use mediabuf_heap::Storage;

/// Local filesystem storage (rooted at the host filesystem).
#[derive(Debug, Clone, Default)]
pub struct FsStorage;

impl FsStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Storage for FsStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> HeapResult<()> {
        let p = Path::new(path);
        let mut f = File::create(p).map_err(|e| HeapError::Storage(format!("create {path}: {e}")))?;
        f.write_all(bytes)
            .map_err(|e| HeapError::Storage(format!("write {path}: {e}")))?;
        f.flush()
            .map_err(|e| HeapError::Storage(format!("flush {path}: {e}")))?;
        Ok(())
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> HeapResult<Vec<u8>> {
        let mut f = File::open(Path::new(path))
            .map_err(|e| HeapError::Storage(format!("open {path}: {e}")))?;
        f.seek(SeekFrom::Start(offset))
            .map_err(|e| HeapError::Storage(format!("seek {path}: {e}")))?;
        let mut buf = Vec::with_capacity(len);
        f.take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| HeapError::Storage(format!("read {path}: {e}")))?;
        Ok(buf)
    }

    fn delete(&self, path: &str) -> HeapResult<()> {
        let p = Path::new(path);
        if p.exists() {
            fs::remove_file(p).map_err(|e| HeapError::Storage(format!("delete {path}: {e}")))?;
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> HeapResult<Vec<String>> {
        let prefix_path = Path::new(prefix);
        let mut results = Vec::new();

        if !prefix_path.exists() {
            return Ok(results);
        }

        if prefix_path.is_file() {
            if let Some(s) = prefix_path.to_str() {
                results.push(s.to_string());
            }
            return Ok(results);
        }

        let entries =
            fs::read_dir(prefix_path).map_err(|e| HeapError::Storage(format!("list: {e}")))?;
        for entry in entries {
            let path = entry
                .map_err(|e| HeapError::Storage(format!("list: {e}")))?
                .path();
            if path.is_file() {
                if let Some(s) = path.to_str() {
                    results.push(s.to_string());
                }
            }
        }
        results.sort();
        Ok(results)
    }

    fn size(&self, path: &str) -> HeapResult<u64> {
        let meta =
            fs::metadata(Path::new(path)).map_err(|e| HeapError::Storage(format!("size {path}: {e}")))?;
        Ok(meta.len())
    }

    fn exists(&self, path: &str) -> HeapResult<bool> {
        Ok(Path::new(path).exists())
    }
}
