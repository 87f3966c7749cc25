//! Error types for nimbus-pool.

use thiserror::Error;

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while decoding pool snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The snapshot carried no entries at all.
    #[error("empty pool snapshot")]
    EmptySnapshot,

    /// An entry was not of the form `id=channel`.
    #[error("malformed snapshot entry: {0:?}")]
    MalformedEntry(String),

    /// The node id of an entry is not a 32-bit unsigned integer.
    #[error("invalid node id: {0:?}")]
    InvalidNodeId(String),

    /// The channel of an entry is not an integer.
    #[error("invalid channel: {0:?}")]
    InvalidChannel(String),
}
