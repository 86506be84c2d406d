//! Error types for panopticon-core.

use thiserror::Error;

/// Errors raised while decoding stored or wire values into core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("unknown audit action: {0}")]
    UnknownAction(String),

    #[error("unknown severity: {0}")]
    UnknownSeverity(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

/// Result type alias for panopticon-core operations.
pub type Result<T> = std::result::Result<T, Error>;
