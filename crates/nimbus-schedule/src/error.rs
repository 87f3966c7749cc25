//! Error types for nimbus-schedule.

use thiserror::Error;

/// Result type for scheduling operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro registration errors. All of them are startup misconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A macro was registered with a zero-length slot.
    #[error("macro {program:?} has zero duration")]
    ZeroDuration { program: String },

    /// A macro was registered with a zero repeat count.
    #[error("macro {program:?} has zero repeat count")]
    ZeroRepeat { program: String },

    /// The registry already holds its maximum number of macros.
    #[error("macro registry full ({capacity} macros)")]
    RegistryFull { capacity: usize },
}
