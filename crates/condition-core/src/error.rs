//! Error types for the condition resolver.

use thiserror::Error;

/// Errors that can occur while evaluating a condition tree.
#[derive(Error, Debug)]
pub enum ConditionError {
    /// A condition referenced a target whose kind/id the evaluation target
    /// could not resolve at all (distinct from resolving to `None`, which
    /// is a normal "missing node" case and evaluates to `false`, not an
    /// error).
    #[error("malformed condition: {message}")]
    Malformed { message: String },

    /// A `Group`/list node was empty; there is nothing to fold.
    #[error("empty condition group")]
    EmptyGroup,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for condition operations.
pub type ConditionResult<T> = Result<T, ConditionError>;
