#![forbid(unsafe_code)]
//! mediabuf-heap: handle-indirected heap for buffered media.
//!
//! Allocations are served by a primary in-memory backend (arena or native)
//! and, once the primary share of the limit is exhausted, by an optional spill
//! backend (device memory through an adapter, or one file per allocation).
//! Callers only ever see `AllocationHandle`s; bytes are reached by mapping.
//!
//! No filesystem code lives here. File spill writes through the `Storage`
//! trait (in `spill::`), implemented by `mediabuf-io`.

pub mod backend;
pub mod error;
pub mod heap;
pub mod spill;
pub mod tracking;

pub use backend::{overall_size, Store, StoreKind};
pub use error::{Error, Result};
pub use heap::{Heap, HeapBuilder, HeapStats, Mapping};
pub use spill::device::{DeviceAdapter, DeviceHandle, DeviceSession, HostRegionAdapter, SessionMode};
pub use spill::Storage;
