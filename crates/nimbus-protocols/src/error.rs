//! Error types for nimbus-protocols.

use thiserror::Error;

/// Result type for nimbus-protocols operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding or handling gossip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The datagram was not valid UTF-8 text.
    #[error("message is not valid UTF-8")]
    NotText,

    /// No known message prefix matched.
    #[error("unknown message: {0:?}")]
    UnknownMessage(String),

    /// A known prefix carried a payload that failed to parse.
    #[error("invalid {kind} payload: {payload:?}")]
    InvalidPayload {
        kind: &'static str,
        payload: String,
    },

    /// A pool snapshot failed to parse.
    #[error("invalid pool snapshot: {0}")]
    Snapshot(#[from] nimbus_pool::Error),
}
