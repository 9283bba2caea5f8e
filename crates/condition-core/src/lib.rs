//! Condition resolver: evaluates boolean condition trees against entity
//! state.
//!
//! The tree shape mirrors the engine's config-driven conditions —
//! attribute/variable/context/trait/modifier/compound comparisons, folded
//! via `all`/`any`/`not` or an ordered list of connectors — and is
//! evaluated synchronously against anything implementing [`ConditionTarget`].
//! No I/O happens at this layer: condition evaluation runs inline on every
//! cascade pass and threshold check.

pub mod error;
pub mod resolver;
pub mod types;

pub use error::{ConditionError, ConditionResult};
pub use resolver::ConditionResolver;
pub use types::{
    Condition, ConditionItem, ConditionKind, ConditionNode, ConditionOperator, ConditionTarget,
    Connector,
};
