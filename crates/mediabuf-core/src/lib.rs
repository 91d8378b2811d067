//! mediabuf-core: types shared by the heap engine and the content view.
//!
//! The content view never depends on the heap crate. Both depend on this
//! crate for the handle type, limits, and configuration.

pub mod config;
pub mod error;
pub mod handle;
pub mod limits;
pub mod prelude;

pub use error::{Error, Result};
