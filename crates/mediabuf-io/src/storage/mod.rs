//! Storage adapters implementing `mediabuf_heap::Storage`.
//!
//! The spill root decides the adapter: a plain path uses the local
//! filesystem, `memory://` keeps spill files in process.

mod fs;
pub use fs::FsStorage;

use mediabuf_core::config::HeapConfig;
use mediabuf_heap::Storage;

use crate::error::{Error, Result};
use crate::memory_storage::MemoryStorage;

pub const MEMORY_SCHEME: &str = "memory";

/// Scheme prefix of a spill root, if it has one.
pub fn scheme(root: &str) -> Option<&str> {
    root.split_once("://")
        .map(|(s, _)| s.trim())
        .filter(|s| !s.is_empty())
}

/// Build the storage backend for a heap's spill root.
pub fn build_spill_storage(cfg: &HeapConfig) -> Result<Box<dyn Storage>> {
    #[cfg(feature = "tracing")]
    tracing::debug!(root = %cfg.spill_root, "selecting spill storage");

    match scheme(&cfg.spill_root) {
        None => Ok(Box::new(FsStorage::new())),
        Some(MEMORY_SCHEME) => {
            let storage = MemoryStorage::new();
            storage.create_dir(&cfg.spill_root);
            Ok(Box::new(storage))
        }
        Some(other) => Err(Error::Config(format!("unsupported spill scheme '{other}'"))),
    }
}
