//! Error types for the simulation engine.

use thiserror::Error;
use shared::SharedError;

/// Engine-wide error type.
///
/// Per the error taxonomy: `ConfigError` is fatal for `load_config`.
/// `NotFound`/`NoEligibleTraits`/`CapacityExceeded` are *not* raised as
/// errors by the public API — most operations report them as `false`/
/// `None` for fluency, matching "callers query via `getEntity`/`getPool`,
/// never fatal". These variants exist for the internal call paths
/// (selection, pool assignment) that need to distinguish failure modes
/// before translating them into the fluent public return shape.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Unknown node kind, missing relationship referent, duplicate id.
    /// Raised by `load_config`; fatal for that call.
    #[error("config error: {0}")]
    Config(String),

    /// Entity/preset/pool/node id absent at call time.
    #[error("not found: {0}")]
    NotFound(String),

    /// A weighted selection pool had zero total weight.
    #[error("no eligible traits for layer {layer_id}")]
    NoEligibleTraits { layer_id: String },

    /// Entity store or pool is at capacity.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A derived formula failed to evaluate; caller already defaulted the
    /// value to `0` and logged this as a warning, this variant exists for
    /// call sites that need the underlying reason.
    #[error("formula evaluation error: {0}")]
    FormulaEvaluation(String),

    /// An index or invariant the config store should have made
    /// impossible was violated anyway. Design-time bug.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Condition(#[from] condition_core::ConditionError),

    #[error(transparent)]
    Shared(#[from] SharedError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    YamlParsing(#[from] serde_yaml::Error),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
