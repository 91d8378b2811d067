//! In-memory storage backend for testing.
//!
//! Provides a HashMap-based storage that implements the Storage trait.
//! Used for `memory://` spill roots to avoid file I/O.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use mediabuf_heap::error::{Error as HeapError, Result as HeapResult};
use mediabuf_heap::Storage;

#[derive(Default)]
struct Inner {
    files: HashMap<String, Vec<u8>>,
    dirs: HashSet<String>,
}

/// Thread-safe in-memory storage. Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

fn normalize_dir(path: &str) -> String {
    path.trim_end_matches('/').to_string()
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> HeapResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| HeapError::Storage("memory storage lock poisoned".into()))
    }

    /// Register a directory so `exists` reports it before any file lands in it.
    pub fn create_dir(&self, path: &str) {
        if let Ok(mut inner) = self.lock() {
            inner.dirs.insert(normalize_dir(path));
        }
    }

    /// Check if a file exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.lock()
            .map(|inner| inner.files.contains_key(path))
            .unwrap_or(false)
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.files.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite a stored file in place, keeping its length.
    pub fn corrupt(&self, path: &str, offset: usize, byte: u8) -> bool {
        match self.lock() {
            Ok(mut inner) => match inner.files.get_mut(path).and_then(|f| f.get_mut(offset)) {
                Some(b) => {
                    *b = byte;
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }
}

impl Storage for MemoryStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> HeapResult<()> {
        let mut inner = self.lock()?;
        inner.files.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> HeapResult<Vec<u8>> {
        let inner = self.lock()?;
        let bytes = inner
            .files
            .get(path)
            .ok_or_else(|| HeapError::Storage(format!("path not found: {}", path)))?;

        let start = offset as usize;
        if start > bytes.len() {
            return Err(HeapError::Storage(format!(
                "offset {} exceeds size {}",
                offset,
                bytes.len()
            )));
        }
        let end = start.saturating_add(len).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    fn delete(&self, path: &str) -> HeapResult<()> {
        let mut inner = self.lock()?;
        inner.files.remove(path);
        Ok(())
    }

    fn list(&self, prefix: &str) -> HeapResult<Vec<String>> {
        let inner = self.lock()?;
        let mut result: Vec<String> = inner
            .files
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        result.sort();
        Ok(result)
    }

    fn size(&self, path: &str) -> HeapResult<u64> {
        let inner = self.lock()?;
        let bytes = inner
            .files
            .get(path)
            .ok_or_else(|| HeapError::Storage(format!("path not found: {}", path)))?;
        Ok(bytes.len() as u64)
    }

    fn exists(&self, path: &str) -> HeapResult<bool> {
        let inner = self.lock()?;
        let dir = normalize_dir(path);
        Ok(inner.files.contains_key(path)
            || inner.dirs.contains(&dir)
            || inner.files.keys().any(|k| k.starts_with(&format!("{dir}/"))))
    }
}
