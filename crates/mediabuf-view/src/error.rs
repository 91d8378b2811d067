use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("index {0} is outside the view")]
    InvalidIndex(u64),

    #[error("timestamp {0} is outside the view")]
    InvalidTimestamp(u64),

    #[error("timestamp {timestamp} overlaps the newest item, which ends at {newest_end}")]
    OutOfOrder { timestamp: u64, newest_end: u64 },

    #[error("no more items")]
    NoMoreItems,

    #[error("invalid view configuration: {0}")]
    Config(String),
}

impl From<mediabuf_core::error::Error> for Error {
    fn from(e: mediabuf_core::error::Error) -> Self {
        match e {
            mediabuf_core::error::Error::Config(msg) => Error::Config(msg),
            mediabuf_core::error::Error::Invariant(msg) => Error::InvalidArgument(msg),
        }
    }
}
