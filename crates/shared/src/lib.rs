//! Shared types, error definitions, and small utility helpers used across
//! the entity simulation engine's crates.

pub mod constants;
pub mod error;
pub mod types;
pub mod utils;

pub use error::{SharedError, SharedResult};
pub use types::*;
pub use utils::*;
