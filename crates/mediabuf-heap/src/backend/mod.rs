//! Backing stores behind the heap's handle table.
//!
//! Every store (primary or spill) speaks in store-local slots. The heap maps
//! handles to `(tier, slot)` and never exposes slots to callers.

pub mod arena;
pub mod native;

use crate::error::Result;

pub use arena::ArenaBackend;
pub use native::NativeBackend;

/// Bytes charged ahead of every allocation.
pub const ALLOCATION_HEADER_SIZE: u64 = 32;

/// Bytes charged behind every allocation.
pub const ALLOCATION_FOOTER_SIZE: u64 = 8;

pub const ALLOCATION_ALIGNMENT: u64 = 8;

pub fn align_up(size: u64) -> u64 {
    (size + ALLOCATION_ALIGNMENT - 1) & !(ALLOCATION_ALIGNMENT - 1)
}

/// Heap usage charged for a request of `size` bytes.
pub fn overall_size(size: u64) -> u64 {
    ALLOCATION_HEADER_SIZE + align_up(size) + ALLOCATION_FOOTER_SIZE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Arena,
    Native,
    Device,
    File,
}

/// A single backend. Slots are only meaningful to the store that issued them.
///
/// `map`/`unmap` are called once per caller map/unmap. `first` and `last`
/// tell the store when the per-handle map count leaves or returns to zero.
pub trait Store: Send {
    fn kind(&self) -> StoreKind;

    /// Capacity share of this store (bytes, overhead included).
    fn limit(&self) -> u64;

    /// Bytes currently charged against `limit`.
    fn used(&self) -> u64;

    /// `Ok(None)` means "no room", which is not an error.
    fn alloc(&mut self, size: u64) -> Result<Option<u64>>;

    fn free(&mut self, slot: u64) -> Result<()>;

    /// Change the size without moving. `Ok(false)` asks the heap to relocate.
    fn resize_in_place(&mut self, slot: u64, old_size: u64, new_size: u64) -> Result<bool>;

    fn map(&mut self, slot: u64, size: u64, first: bool) -> Result<()>;

    fn unmap(&mut self, slot: u64, size: u64, last: bool) -> Result<()>;

    fn bytes(&self, slot: u64, size: u64) -> Result<&[u8]>;

    fn bytes_mut(&mut self, slot: u64, size: u64) -> Result<&mut [u8]>;

    /// Validate internal bookkeeping.
    fn check(&self) -> Result<()>;

    /// Tear the store down. Must tolerate being called twice.
    fn release(&mut self) -> Result<()>;
}
