//! File spill: every spilled allocation is one file `<root>/<n>.hfh`.
//!
//! `n` starts at 1 and increases for the lifetime of the heap. Map reads the
//! whole file into a host buffer; every unmap writes the buffer back.

use std::collections::HashMap;

use mediabuf_core::config::SpillCodec;
use mediabuf_core::limits::SPILL_FILE_EXTENSION;

use super::codec::{self, compress, decompress};
use super::header::{checksum, SpillFileHeader, HEADER_LEN};
use super::Storage;
use crate::backend::{overall_size, Store, StoreKind};
use crate::error::{Error, Result};

struct SpillFile {
    path: String,
    size: u64,
    checksum: [u8; 32],
    staged: Option<Vec<u8>>,
}

pub struct FileSpill {
    storage: Box<dyn Storage>,
    root: String,
    codec: SpillCodec,
    limit: u64,
    used: u64,
    next_seq: u64,
    files: HashMap<u64, SpillFile>,
}

impl FileSpill {
    pub fn new(
        storage: Box<dyn Storage>,
        root: impl Into<String>,
        codec: SpillCodec,
        limit: u64,
    ) -> Result<Self> {
        let root = root.into();
        codec::ensure_available(codec)?;
        if !storage.exists(&root)? {
            return Err(Error::Config(format!(
                "spill root directory '{root}' does not exist"
            )));
        }
        Ok(Self {
            storage,
            root,
            codec,
            limit,
            used: 0,
            next_seq: 1,
            files: HashMap::new(),
        })
    }

    pub fn path_for(&self, seq: u64) -> String {
        format!(
            "{}/{}{}",
            self.root.trim_end_matches('/'),
            seq,
            SPILL_FILE_EXTENSION
        )
    }

    fn file(&self, slot: u64) -> Result<&SpillFile> {
        self.files
            .get(&slot)
            .ok_or_else(|| Error::Corrupted(format!("no spill file for slot {slot}")))
    }

    fn file_mut(&mut self, slot: u64) -> Result<&mut SpillFile> {
        self.files
            .get_mut(&slot)
            .ok_or_else(|| Error::Corrupted(format!("no spill file for slot {slot}")))
    }

    /// Write `payload` behind a fresh header and return the image checksum.
    fn persist(&self, path: &str, payload: &[u8]) -> Result<[u8; 32]> {
        let stored = compress(self.codec, payload)?;
        let header = SpillFileHeader::new(self.codec, payload.len() as u64, stored.len() as u64);

        let mut image = Vec::with_capacity(HEADER_LEN + stored.len());
        image.extend_from_slice(&header.to_bytes());
        image.extend_from_slice(&stored);

        self.storage.write(path, &image)?;
        Ok(checksum(&image))
    }

    fn load(&self, file: &SpillFile) -> Result<Vec<u8>> {
        let total = self.storage.size(&file.path)?;
        let image = self.storage.read_range(&file.path, 0, total as usize)?;
        if checksum(&image) != file.checksum {
            return Err(Error::ChecksumMismatch);
        }

        let header = SpillFileHeader::from_bytes(&image)?;
        let stored = image
            .get(HEADER_LEN..HEADER_LEN + header.stored_len as usize)
            .ok_or_else(|| Error::Storage(format!("truncated spill file {}", file.path)))?;
        let payload = decompress(header.codec, stored)?;
        if payload.len() as u64 != file.size || header.payload_len != file.size {
            return Err(Error::Storage(format!(
                "spill file {} holds {} bytes, expected {}",
                file.path,
                payload.len(),
                file.size
            )));
        }
        Ok(payload)
    }
}

impl Store for FileSpill {
    fn kind(&self) -> StoreKind {
        StoreKind::File
    }

    fn limit(&self) -> u64 {
        self.limit
    }

    fn used(&self) -> u64 {
        self.used
    }

    fn alloc(&mut self, size: u64) -> Result<Option<u64>> {
        let charged = overall_size(size);
        if self.used + charged > self.limit {
            return Ok(None);
        }

        let seq = self.next_seq;
        let path = self.path_for(seq);
        let payload = vec![0u8; size as usize];
        let checksum = self.persist(&path, &payload)?;
        self.next_seq += 1;

        self.files.insert(
            seq,
            SpillFile {
                path,
                size,
                checksum,
                staged: None,
            },
        );
        self.used += charged;
        Ok(Some(seq))
    }

    fn free(&mut self, slot: u64) -> Result<()> {
        let path = self.file(slot)?.path.clone();
        self.storage.delete(&path)?;
        if let Some(file) = self.files.remove(&slot) {
            self.used -= overall_size(file.size);
        }
        Ok(())
    }

    fn resize_in_place(&mut self, slot: u64, old_size: u64, new_size: u64) -> Result<bool> {
        let (old_charge, new_charge) = (overall_size(old_size), overall_size(new_size));
        if self.used - old_charge + new_charge > self.limit {
            return Ok(false);
        }

        let file = self.file(slot)?;
        let mut payload = match &file.staged {
            Some(staged) => staged.clone(),
            None => self.load(file)?,
        };
        payload.resize(new_size as usize, 0u8);
        let path = file.path.clone();
        let checksum = self.persist(&path, &payload)?;

        let file = self.file_mut(slot)?;
        file.size = new_size;
        file.checksum = checksum;
        if file.staged.is_some() {
            file.staged = Some(payload);
        }
        self.used = self.used - old_charge + new_charge;
        Ok(true)
    }

    fn map(&mut self, slot: u64, _size: u64, first: bool) -> Result<()> {
        let file = self.file(slot)?;
        if !first && file.staged.is_some() {
            return Ok(());
        }
        let payload = self.load(file)?;
        self.file_mut(slot)?.staged = Some(payload);
        Ok(())
    }

    fn unmap(&mut self, slot: u64, _size: u64, last: bool) -> Result<()> {
        let file = self.file(slot)?;
        let Some(staged) = file.staged.as_deref() else {
            return Err(Error::Storage(format!("spill file {} is not mapped", file.path)));
        };
        let written = self.persist(&file.path, staged);

        let file = self.file_mut(slot)?;
        if last {
            file.staged = None;
        }
        file.checksum = written?;
        Ok(())
    }

    fn bytes(&self, slot: u64, size: u64) -> Result<&[u8]> {
        let file = self.file(slot)?;
        file.staged
            .as_deref()
            .and_then(|b| b.get(..size as usize))
            .ok_or_else(|| Error::Storage(format!("spill file {} is not mapped", file.path)))
    }

    fn bytes_mut(&mut self, slot: u64, size: u64) -> Result<&mut [u8]> {
        let file = self.file_mut(slot)?;
        let path = &file.path;
        match file.staged.as_deref_mut().and_then(|b| b.get_mut(..size as usize)) {
            Some(bytes) => Ok(bytes),
            None => Err(Error::Storage(format!("spill file {path} is not mapped"))),
        }
    }

    fn check(&self) -> Result<()> {
        let charged: u64 = self.files.values().map(|f| overall_size(f.size)).sum();
        if charged != self.used || self.used > self.limit {
            return Err(Error::Corrupted(format!(
                "file spill accounts {} bytes, files hold {charged}, limit {}",
                self.used, self.limit
            )));
        }
        Ok(())
    }

    /// Deletes every spill file this store still owns.
    fn release(&mut self) -> Result<()> {
        let mut first_err = None;
        for (_, file) in self.files.drain() {
            if let Err(e) = self.storage.delete(&file.path) {
                first_err.get_or_insert(e);
            }
        }
        self.used = 0;
        first_err.map_or(Ok(()), Err)
    }
}
