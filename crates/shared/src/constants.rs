//! Normalization defaults shared across the config store, selection core,
//! and pool manager — the defaults config normalization fills in when a
//! document leaves a field unset.

/// Default tick rate for the auto-tick scheduler, in milliseconds.
pub const DEFAULT_TICK_RATE_MS: u64 = 1000;

/// Default `selection.baseWeight` for a trait with none specified.
pub const DEFAULT_BASE_WEIGHT: f64 = 20.0;

/// Default `selection.maxItems` for a layer.
pub const DEFAULT_MAX_ITEMS: usize = 10;

/// Default initial value for a variable with none specified.
pub const DEFAULT_VARIABLE_INITIAL: f64 = 100.0;

/// Default `maxStacks` for a stacking modifier.
pub const DEFAULT_MAX_STACKS: u32 = 99;

/// Default `maxEntities` for the entity store.
pub const DEFAULT_MAX_ENTITIES: usize = 100_000;

/// Default `maxHistory` ring size per entity.
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Default weight floor applied after all weight-influence relationships.
pub const DEFAULT_WEIGHT_FLOOR: f64 = 0.0;
