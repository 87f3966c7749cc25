//! Error types for nimbus-node.

use nimbus_pool::NodeId;
use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running a node.
#[derive(Debug, Error)]
pub enum Error {
    /// An environment variable held an unusable value.
    #[error("invalid {var}: {value:?} ({reason})")]
    Config {
        var: &'static str,
        value: String,
        reason: String,
    },

    /// The macro registry could not be built.
    #[error("macro registry error: {0}")]
    Schedule(#[from] nimbus_schedule::Error),

    /// No address is known for a unicast destination.
    #[error("no route to node {0}")]
    UnknownPeer(NodeId),

    /// The simulated hub has no such node.
    #[error("node {0} is not attached")]
    Detached(NodeId),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
