#![forbid(unsafe_code)]
//! mediabuf-view: a bounded rolling window of media item descriptors.
//!
//! Items carry a caller-chosen payload `H` (usually a heap
//! `AllocationHandle`) that the view never interprets. The view owns the
//! ordering rules, the overflow policy, the consumer cursor and the
//! retention of the item currently in flight.

pub mod error;
pub mod item;
pub mod view;

pub use error::{Error, Result};
pub use item::{ItemFlags, NewItem, ViewItem};
pub use view::{Aggregate, ContentView, EvictionCallback};
