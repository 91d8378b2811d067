use mediabuf_core::handle::AllocationHandle;
use thiserror::Error;

/// Result type local to mediabuf-heap.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid allocation size {0}")]
    InvalidAllocationSize(u64),

    #[error("invalid or unknown handle {0}")]
    InvalidHandle(AllocationHandle),

    #[error("{handle} has {map_count} outstanding mapping(s)")]
    HandleMapped {
        handle: AllocationHandle,
        map_count: u32,
    },

    #[error("{0} is not mapped")]
    NotMapped(AllocationHandle),

    #[error("not enough heap space for {requested} bytes")]
    OutOfSpace { requested: u64 },

    #[error("heap configuration error: {0}")]
    Config(String),

    #[error("spill storage error: {0}")]
    Storage(String),

    #[error("device adapter error: {0}")]
    Device(String),

    #[error("unsupported codec: {0}")]
    CodecUnsupported(&'static str),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("heap corrupted: {0}")]
    Corrupted(String),

    #[error("heap has been released")]
    Released,
}

impl From<mediabuf_core::error::Error> for Error {
    fn from(e: mediabuf_core::error::Error) -> Self {
        match e {
            mediabuf_core::error::Error::Config(msg) => Error::Config(msg),
            mediabuf_core::error::Error::Invariant(msg) => Error::Corrupted(msg),
        }
    }
}
