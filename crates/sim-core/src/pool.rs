//! Pool Manager: named object pools with rule-based assignment,
//! acquire/release, and shrink scheduling. The `default` pool always
//! exists and cannot be removed.

use std::collections::HashMap;

use crate::config::ConfigIndex;
use crate::events::{Event, EventBus, EventKind};
use crate::rng::RngSource;
use crate::spawner::{self, SpawnOverrides};
use crate::types::Entity;

pub const DEFAULT_POOL_ID: &str = "default";

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: usize,
    pub pre_warm: usize,
    pub pre_warm_preset: Option<String>,
    pub shrink_threshold: f64,
    pub shrink_delay_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_size: 100, pre_warm: 0, pre_warm_preset: None, shrink_threshold: 0.25, shrink_delay_ms: 30_000 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub total_created: u64,
    pub total_acquired: u64,
    pub in_use: u64,
}

/// A single condition entry in a pool's rule-based assignment set.
#[derive(Debug, Clone)]
pub enum RuleCondition {
    Preset { glob: String, weight: f64 },
    Trait { trait_id: String, weight: f64 },
    Attribute { attribute_id: String, operator: condition_core::ConditionOperator, value: f64, weight: f64 },
    Variable { variable_id: String, operator: condition_core::ConditionOperator, value: f64, weight: f64 },
    Modifier { modifier_id: String, weight: f64 },
    Compound { compound_id: String, weight: f64 },
}

#[derive(Debug, Clone)]
pub struct PoolRule {
    pub priority: i32,
    pub conditions: Vec<RuleCondition>,
}

pub struct Pool {
    pub id: String,
    pub name: String,
    pub config: PoolConfig,
    pub stats: PoolStats,
    pub entities: Vec<Entity>,
    pub rules: Vec<PoolRule>,
}

/// Manages every pool instance for one engine. The `default` pool is
/// created eagerly and rejected on `remove_pool`.
pub struct PoolManager {
    pools: HashMap<String, Pool>,
}

impl Default for PoolManager {
    fn default() -> Self {
        let mut pools = HashMap::new();
        pools.insert(
            DEFAULT_POOL_ID.to_string(),
            Pool { id: DEFAULT_POOL_ID.to_string(), name: "default".to_string(), config: PoolConfig::default(), stats: PoolStats::default(), entities: Vec::new(), rules: Vec::new() },
        );
        Self { pools }
    }
}

impl PoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_pool(&mut self, id: &str, name: &str, config: PoolConfig, rules: Vec<PoolRule>, events: &EventBus) {
        self.pools.insert(id.to_string(), Pool { id: id.to_string(), name: name.to_string(), config, stats: PoolStats::default(), entities: Vec::new(), rules });
        events.emit(Event::new(EventKind::PoolCreated, None, serde_json::json!({ "poolId": id })));
    }

    /// Returns `false` (no-op) for the `default` pool, which cannot be
    /// removed.
    pub fn remove_pool(&mut self, id: &str, events: &EventBus) -> bool {
        if id == DEFAULT_POOL_ID {
            return false;
        }
        let removed = self.pools.remove(id).is_some();
        if removed {
            events.emit(Event::new(EventKind::PoolRemoved, None, serde_json::json!({ "poolId": id })));
        }
        removed
    }

    pub fn configure_pool(&mut self, id: &str, config: PoolConfig, events: &EventBus) -> bool {
        let Some(pool) = self.pools.get_mut(id) else { return false };
        pool.config = config;
        events.emit(Event::new(EventKind::PoolConfigured, None, serde_json::json!({ "poolId": id })));
        true
    }

    pub fn set_pool_rules(&mut self, id: &str, rules: Vec<PoolRule>, events: &EventBus) -> bool {
        let Some(pool) = self.pools.get_mut(id) else { return false };
        pool.rules = rules;
        events.emit(Event::new(EventKind::PoolRulesUpdated, None, serde_json::json!({ "poolId": id })));
        true
    }

    pub fn get(&self, id: &str) -> Option<&Pool> {
        self.pools.get(id)
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.pools.keys().cloned().collect()
    }

    pub fn all_stats(&self) -> HashMap<String, PoolStats> {
        self.pools.iter().map(|(id, pool)| (id.clone(), pool.stats.clone())).collect()
    }

    /// Spawn `count` fresh entities directly into `pool_id`'s free list,
    /// without storing/activating them, for warm-start latency.
    #[allow(clippy::too_many_arguments)]
    pub fn pre_warm(
        &mut self,
        config: &ConfigIndex,
        config_id: &str,
        pool_id: &str,
        count: usize,
        rng: &mut dyn RngSource,
        events: &EventBus,
    ) -> usize {
        let Some(pool) = self.pools.get_mut(pool_id) else { return 0 };
        let preset = pool.config.pre_warm_preset.clone();
        let mut created = 0;
        for _ in 0..count {
            if pool.entities.len() >= pool.config.max_size {
                break;
            }
            let spawned = match &preset {
                Some(p) => spawner::spawn(config, config_id, p, &SpawnOverrides::default(), rng, events),
                None => spawner::generate(config, config_id, &SpawnOverrides::default(), rng, events),
            };
            let Ok(mut entity) = spawned else { break };
            entity.pool_id = Some(pool_id.to_string());
            pool.entities.push(entity);
            pool.stats.total_created += 1;
            created += 1;
        }
        created
    }

    /// Drop every free (non-in-use) entity from `pool_id`'s list,
    /// returning how many were cleared.
    pub fn clear_pool(&mut self, pool_id: &str) -> usize {
        let Some(pool) = self.pools.get_mut(pool_id) else { return 0 };
        let n = pool.entities.len();
        pool.entities.clear();
        n
    }

    /// `acquire`: pop-and-reset from the target pool if non-empty, else
    /// spawn a fresh entity via the Spawner.
    #[allow(clippy::too_many_arguments)]
    pub fn acquire(
        &mut self,
        config: &ConfigIndex,
        config_id: &str,
        preset_id: Option<&str>,
        overrides: &SpawnOverrides,
        target_pool_id: Option<&str>,
        rng: &mut dyn RngSource,
        events: &EventBus,
    ) -> Option<Entity> {
        let target = target_pool_id.unwrap_or(DEFAULT_POOL_ID).to_string();

        let mut created_new = false;
        let mut entity = if let Some(pool) = self.pools.get_mut(&target) {
            if let Some(mut reused) = pool.entities.pop() {
                spawner::reset_for_reuse(&mut reused, config, preset_id, overrides, rng, events);
                reused
            } else {
                let spawned = match preset_id {
                    Some(p) => spawner::spawn(config, config_id, p, overrides, rng, events).ok()?,
                    None => spawner::generate(config, config_id, overrides, rng, events).ok()?,
                };
                pool.stats.total_created += 1;
                created_new = true;
                spawned
            }
        } else {
            return None;
        };

        // Rule-based reassignment only applies when the caller left the
        // target pool unspecified.
        let assigned = if target_pool_id.is_some() {
            target.clone()
        } else {
            self.assign_pool(config, &entity, None)
        };
        entity.pool_id = Some(assigned.clone());

        // A fresh creation was provisionally charged to `target`; once the
        // entity is actually reassigned elsewhere by rule, move that
        // credit so `total_created` reflects the pool that ends up owning
        // the entity, not the staging pool it was spawned into.
        if created_new && assigned != target {
            if let Some(pool) = self.pools.get_mut(&target) {
                pool.stats.total_created = pool.stats.total_created.saturating_sub(1);
            }
            if let Some(pool) = self.pools.get_mut(&assigned) {
                pool.stats.total_created += 1;
            }
        }

        if let Some(pool) = self.pools.get_mut(&assigned) {
            pool.stats.total_acquired += 1;
            pool.stats.in_use += 1;
        }

        events.emit(Event::new(EventKind::EntityAcquired, Some(entity.id), serde_json::json!({ "poolId": assigned })));
        Some(entity)
    }

    /// `release`: return the entity to its pool's free list if there's
    /// room, clearing transient state but preserving structural keys;
    /// otherwise drop it entirely.
    pub fn release(&mut self, mut entity: Entity, target_pool_id: Option<&str>, events: &EventBus) -> bool {
        let target = target_pool_id.unwrap_or_else(|| entity.pool_id.as_deref().unwrap_or(DEFAULT_POOL_ID)).to_string();
        let Some(pool) = self.pools.get_mut(&target) else { return false };

        pool.stats.in_use = pool.stats.in_use.saturating_sub(1);
        events.emit(Event::new(EventKind::EntityReleased, Some(entity.id), serde_json::json!({ "poolId": target })));

        if pool.entities.len() < pool.config.max_size {
            clear_transient_state(&mut entity);
            entity.pool_id = Some(target.clone());
            pool.entities.push(entity);
            true
        } else {
            false
        }
    }

    /// `getPoolForEntity`: honor an existing `pool_id`, else score every
    /// non-default pool's rules and return the highest `priority`-then-
    /// score match, falling back to `default`.
    pub fn assign_pool(&self, config: &ConfigIndex, entity: &Entity, explicit: Option<&str>) -> String {
        if let Some(id) = explicit {
            if self.pools.contains_key(id) {
                return id.to_string();
            }
        }
        if let Some(id) = &entity.pool_id {
            if self.pools.contains_key(id) {
                return id.clone();
            }
        }

        let mut best: Option<(&str, i32, f64)> = None;
        for (id, pool) in &self.pools {
            if id == DEFAULT_POOL_ID || pool.rules.is_empty() {
                continue;
            }
            for rule in &pool.rules {
                let score = score_rule(config, entity, rule);
                if score <= 0.0 {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((_, p, s)) => (rule.priority, score) > (p, s),
                };
                if better {
                    best = Some((id, rule.priority, score));
                }
            }
        }

        best.map(|(id, _, _)| id.to_string()).unwrap_or_else(|| DEFAULT_POOL_ID.to_string())
    }
}

fn score_rule(config: &ConfigIndex, entity: &Entity, rule: &PoolRule) -> f64 {
    rule.conditions.iter().map(|c| score_condition(config, entity, c)).sum()
}

fn score_condition(_config: &ConfigIndex, entity: &Entity, condition: &RuleCondition) -> f64 {
    match condition {
        RuleCondition::Preset { glob, weight } => {
            let matched = entity.preset_id.as_deref().map(|p| glob_matches(glob, p)).unwrap_or(false);
            if matched { *weight } else { 0.0 }
        }
        RuleCondition::Trait { trait_id, weight } => if entity.is_trait_active(trait_id) { *weight } else { 0.0 },
        RuleCondition::Modifier { modifier_id, weight } => if entity.is_modifier_active(modifier_id) { *weight } else { 0.0 },
        RuleCondition::Compound { compound_id, weight } => if entity.is_compound_active(compound_id) { *weight } else { 0.0 },
        RuleCondition::Attribute { attribute_id, operator, value, weight } => {
            match entity.attributes.get(attribute_id) {
                Some(current) if compare(*current, *operator, *value) => *weight,
                _ => 0.0,
            }
        }
        RuleCondition::Variable { variable_id, operator, value, weight } => {
            match entity.variables.get(variable_id) {
                Some(state) if compare(state.value, *operator, *value) => *weight,
                _ => 0.0,
            }
        }
    }
}

fn compare(lhs: f64, operator: condition_core::ConditionOperator, rhs: f64) -> bool {
    use condition_core::ConditionOperator::*;
    match operator {
        Lt => lhs < rhs,
        Lte => lhs <= rhs,
        Gt => lhs > rhs,
        Gte => lhs >= rhs,
        Eq => (lhs - rhs).abs() < f64::EPSILON,
        Ne => (lhs - rhs).abs() >= f64::EPSILON,
        Active | Inactive => false,
    }
}

/// `*` in a preset glob matches any substring; every other character
/// must match literally.
pub(crate) fn glob_matches(glob: &str, value: &str) -> bool {
    if !glob.contains('*') {
        return glob == value;
    }
    let parts: Vec<&str> = glob.split('*').collect();
    let mut rest = value;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 && !glob.starts_with('*') {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if let Some(pos) = rest.find(part) {
            rest = &rest[pos + part.len()..];
        } else {
            return false;
        }
    }
    true
}

fn clear_transient_state(entity: &mut Entity) {
    entity.internal.log.clear();
    entity.modifiers.clear();
    entity.modifier_states.clear();
    entity.compounds.clear();
    for layer in entity.layers.values_mut() {
        layer.active.clear();
    }
}
