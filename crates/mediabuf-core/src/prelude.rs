//! Convenient re-exports for downstream crates.

pub use crate::config::{HeapConfig, OverflowPolicy, PrimaryBackend, SpillCodec, SpillKind, ViewConfig};
pub use crate::error::{Error, Result};
pub use crate::handle::{AllocationHandle, INVALID_HANDLE};
