//! mediabuf-io: storage adapters for spill files and default heap wiring.
//!
//! - `storage::FsStorage`: local filesystem (default).
//! - `memory_storage::MemoryStorage`: in-process map for tests and
//!   `memory://` spill roots.
//! - `open_heap`: builds a heap from a `HeapConfig`, supplying storage for
//!   file spill and a host-backed device session for device spill.

pub mod error;
pub mod memory_storage;
pub mod storage;

use mediabuf_core::config::{HeapConfig, SpillKind};
use mediabuf_heap::{DeviceSession, Heap, HostRegionAdapter};

pub use error::{Error, Result};
pub use memory_storage::MemoryStorage;
pub use storage::{build_spill_storage, FsStorage};

/// Build a heap with default collaborators for its spill backend.
pub fn open_heap(config: &HeapConfig) -> Result<Heap> {
    let mut builder = Heap::builder(config.clone());
    match config.spill {
        Some(SpillKind::File) => {
            builder = builder.storage(build_spill_storage(config)?);
        }
        Some(SpillKind::Device) => {
            let adapter = HostRegionAdapter::new(config.spill_limit());
            builder = builder.device_session(DeviceSession::exclusive(adapter));
        }
        None => {}
    }
    let heap = builder.build()?;

    #[cfg(feature = "tracing")]
    tracing::debug!(spill = ?config.spill, limit = config.limit_bytes, "heap opened");
    Ok(heap)
}
