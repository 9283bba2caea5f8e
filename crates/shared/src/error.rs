//! Error types and result definitions shared across the engine's crates.

use thiserror::Error;

/// Base error type for code that does not belong to a single crate-level
/// error enum (config-store, condition, and engine errors each carry their
/// own richer enum and wrap this one via `#[from]` where appropriate).
#[derive(Error, Debug)]
pub enum SharedError {
    /// A value failed basic structural validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization of a document failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal error wrapper for otherwise-unclassified failures.
    #[error("internal error: {0}")]
    Internal(String),

    /// IO errors (config file loading, etc).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error wrapper.
    #[error("{0}")]
    Generic(#[from] anyhow::Error),
}

/// Result type alias shared across the engine's crates.
pub type SharedResult<T> = Result<T, SharedError>;

impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        SharedError::Serialization(err.to_string())
    }
}
