//! `sim-core`: a declarative, data-driven entity simulation engine.
//!
//! A configuration document declares attributes, variables, layers of
//! traits, relationships between them, modifiers, compounds, derived
//! values, and actions. This crate loads that document into an
//! immutable, shared-read index, spawns and runs entities against it,
//! and exposes the whole thing as a single async [`Engine`] façade.
//!
//! Module map:
//! - [`types`] — the data model (nodes, relationships, entity state)
//! - [`config`] — parse/normalize/validate/index a config document
//! - [`condition`] — adapts `condition_core` to entity state
//! - [`influence`] — shared relationship-resolution helpers
//! - [`formula`] — the `derived` node expression evaluator
//! - [`rng`] — injectable randomness
//! - [`selection`] — layer trait rolling (Selection Core)
//! - [`cascade`] — rates/compounds/derived recalculation (Cascade Engine)
//! - [`modifiers`] — apply/remove stacking semantics
//! - [`runtime`] — the per-tick loop and Threshold Arbiter
//! - [`spawner`] — entity generation and preset trait resolution
//! - [`store`] — entity storage, groups, history/rollback
//! - [`pool`] — named object pools with rule-based assignment
//! - [`events`] — the synchronous event bus
//! - [`engine`] — the public façade tying every module together

pub mod cascade;
pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod formula;
pub mod influence;
pub mod modifiers;
pub mod pool;
pub mod rng;
pub mod runtime;
pub mod selection;
pub mod spawner;
pub mod store;
pub mod types;

pub use config::ConfigStore;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use events::{Event, EventBus, EventKind, SubscriptionId};
pub use spawner::SpawnOverrides;
