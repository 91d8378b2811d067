//! Spill backends used once the primary share of the heap is exhausted.
//!
//! - `device`: device memory reached through a `DeviceAdapter` session.
//! - `file`: one file per allocation, written through `Storage`.

pub mod codec;
pub mod device;
pub mod file;
pub mod header;

use crate::error::Result;

pub use codec::{compress, decompress};
pub use device::{DeviceAdapter, DeviceHandle, DeviceSession, DeviceSpill, HostRegionAdapter, SessionMode};
pub use file::FileSpill;
pub use header::{SpillFileHeader, HEADER_LEN};

/// Abstract storage interface for spill files.
///
/// Implemented by `mediabuf-io::FsStorage` for the local filesystem and by
/// `mediabuf-io::MemoryStorage` for tests.
pub trait Storage: Send + Sync {
    /// Write bytes to a path, replacing previous contents.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read up to `len` bytes starting at `offset`.
    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Delete a path. Idempotent (no error if path doesn't exist).
    fn delete(&self, path: &str) -> Result<()>;

    /// List all paths under a prefix.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Size of a path in bytes.
    fn size(&self, path: &str) -> Result<u64>;

    /// Whether a file or directory exists at `path`.
    fn exists(&self, path: &str) -> Result<bool>;
}
