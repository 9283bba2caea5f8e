//! The public façade: a single `Engine` wrapping all engine state behind
//! one `tokio::sync::RwLock`, exposing every operation group as an async
//! method. The engine itself is single-threaded-cooperative — the lock
//! only serializes concurrent callers, it never guards parallel
//! mutation of one entity.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cascade;
use crate::config::{ConfigIndex, ConfigStore};
use crate::error::{EngineError, EngineResult};
use crate::events::{Event, EventBus, EventKind, SubscriptionId};
use crate::pool::{PoolConfig, PoolManager, PoolRule};
use crate::rng::{DefaultRng, RngSource};
use crate::runtime;
use crate::selection::{self, SelectionOutcome};
use crate::spawner::{self, SpawnOverrides};
use crate::store::EntityStore;
use crate::types::{Entity, Timestamp};

/// One relationship entry as returned by `previewInfluences`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InfluencePreview {
    pub source_id: String,
    pub rel_type: &'static str,
    pub operation: crate::types::Operation,
    pub value: f64,
    pub scaling: crate::types::Scaling,
}

struct EngineState {
    config: Option<Arc<ConfigIndex>>,
    store: EntityStore,
    pools: PoolManager,
    rng: Box<dyn RngSource>,
    auto_tick: Option<JoinHandle<()>>,
}

/// The engine façade. Cloning shares the same underlying state (`Arc`
/// internally) — every clone is a handle onto one host-embedded,
/// single-instance-per-lock simulation.
#[derive(Clone)]
pub struct Engine {
    state: Arc<RwLock<EngineState>>,
    events: Arc<EventBus>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(EngineState {
                config: None,
                store: EntityStore::default(),
                pools: PoolManager::new(),
                rng: Box::new(DefaultRng::new()),
                auto_tick: None,
            })),
            events: Arc::new(EventBus::new()),
        }
    }

    /// Inject a deterministic RNG (tests, replay tooling).
    pub async fn with_rng(self, rng: Box<dyn RngSource>) -> Self {
        self.state.write().await.rng = rng;
        self
    }

    // -- Config ----------------------------------------------------------

    pub async fn load_config(&self, doc_json: &str) -> EngineResult<()> {
        let index = ConfigStore::load_json(doc_json)?;
        self.state.write().await.config = Some(Arc::new(index));
        info!("config loaded");
        Ok(())
    }

    async fn config(&self) -> EngineResult<Arc<ConfigIndex>> {
        self.state.read().await.config.clone().ok_or_else(|| EngineError::Config("no config loaded".into()))
    }

    // -- Generation --------------------------------------------------------

    pub async fn generate(&self, overrides: SpawnOverrides) -> EngineResult<uuid::Uuid> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let entity = spawner::generate(&config, "default", &overrides, guard.rng.as_mut(), &self.events)?;
        let id = entity.id;
        self.events.emit(Event::new(EventKind::EntitySpawned, Some(id), serde_json::json!({})));
        guard.store.store(entity, &self.events);
        Ok(id)
    }

    pub async fn spawn(&self, preset_id: &str, overrides: SpawnOverrides) -> EngineResult<uuid::Uuid> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let entity = spawner::spawn(&config, "default", preset_id, &overrides, guard.rng.as_mut(), &self.events)?;
        let id = entity.id;
        self.events.emit(Event::new(EventKind::EntitySpawned, Some(id), serde_json::json!({ "presetId": preset_id })));
        guard.store.store(entity, &self.events);
        Ok(id)
    }

    /// `spawnWhere`: resolve the first preset whose id matches `query`
    /// (a `*`-wildcard glob, the same matching rule pool rules use for
    /// presets), then spawn from it.
    pub async fn spawn_where(&self, query: &str, overrides: SpawnOverrides) -> EngineResult<uuid::Uuid> {
        let config = self.config().await?;
        let preset_id = config
            .presets
            .keys()
            .find(|id| crate::pool::glob_matches(query, id))
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("no preset matching query '{query}'")))?;
        self.spawn(&preset_id, overrides).await
    }

    // -- Runtime -----------------------------------------------------------

    pub async fn tick(&self, id: uuid::Uuid, delta_seconds: f64) -> EngineResult<()> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let Some(entity) = guard.store.get_mut(id) else { return Err(EngineError::NotFound(format!("entity '{id}'"))) };
        runtime::tick(entity, &config, delta_seconds, &self.events);
        self.events.emit(Event::new(EventKind::Tick, Some(id), serde_json::json!({ "deltaSeconds": delta_seconds })));
        Ok(())
    }

    pub async fn tick_all(&self, delta_seconds: f64) -> EngineResult<()> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let ids: Vec<uuid::Uuid> = guard.store.active_ids();
        for id in ids {
            if let Some(entity) = guard.store.get_mut(id) {
                runtime::tick(entity, &config, delta_seconds, &self.events);
            }
        }
        self.events.emit(Event::new(EventKind::Tick, None, serde_json::json!({ "deltaSeconds": delta_seconds, "all": true })));
        Ok(())
    }

    /// Start the auto-tick scheduler at the config's `tickRateMs`
    /// interval (or an override). Idempotent: a second call is a no-op
    /// while one is already running.
    pub async fn start_auto_tick(&self, rate_ms_override: Option<u64>) -> EngineResult<()> {
        let config = self.config().await?;
        let rate_ms = rate_ms_override.unwrap_or(config.tick_rate_ms);

        let mut guard = self.state.write().await;
        if guard.auto_tick.is_some() {
            return Ok(());
        }
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(rate_ms));
            loop {
                interval.tick().await;
                if let Err(e) = engine.tick_all(rate_ms as f64 / 1000.0).await {
                    warn!("auto-tick failed: {e}");
                }
            }
        });
        guard.auto_tick = Some(handle);
        self.events.emit(Event::new(EventKind::AutoTickStarted, None, serde_json::json!({ "rateMs": rate_ms })));
        Ok(())
    }

    pub async fn stop_auto_tick(&self) {
        let mut guard = self.state.write().await;
        if let Some(handle) = guard.auto_tick.take() {
            handle.abort();
            self.events.emit(Event::new(EventKind::AutoTickStopped, None, serde_json::json!({})));
        }
    }

    // -- Variables -----------------------------------------------------------

    pub async fn modify_variable(&self, id: uuid::Uuid, var_id: &str, delta: f64) -> EngineResult<()> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let Some(entity) = guard.store.get_mut(id) else { return Err(EngineError::NotFound(format!("entity '{id}'"))) };
        let Some(state) = entity.variables.get_mut(var_id) else { return Err(EngineError::NotFound(format!("variable '{var_id}'"))) };
        state.value += delta;
        state.clamp();
        cascade::run_batched(entity, &config, &self.events);
        self.events.emit(Event::new(EventKind::VariableChanged, Some(id), serde_json::json!({ "variableId": var_id })));
        runtime::threshold::check_thresholds(entity, &config, var_id, &self.events);
        runtime::threshold::check_modifier_thresholds(entity, &config, &self.events);
        Ok(())
    }

    pub async fn set_variable(&self, id: uuid::Uuid, var_id: &str, value: f64) -> EngineResult<()> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let Some(entity) = guard.store.get_mut(id) else { return Err(EngineError::NotFound(format!("entity '{id}'"))) };
        let Some(state) = entity.variables.get_mut(var_id) else { return Err(EngineError::NotFound(format!("variable '{var_id}'"))) };
        state.value = value;
        state.clamp();
        cascade::run_batched(entity, &config, &self.events);
        self.events.emit(Event::new(EventKind::VariableChanged, Some(id), serde_json::json!({ "variableId": var_id })));
        runtime::threshold::check_thresholds(entity, &config, var_id, &self.events);
        runtime::threshold::check_modifier_thresholds(entity, &config, &self.events);
        Ok(())
    }

    // -- Traits --------------------------------------------------------------

    pub async fn activate_trait(&self, id: uuid::Uuid, trait_id: &str) -> EngineResult<()> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let Some(entity) = guard.store.get_mut(id) else { return Err(EngineError::NotFound(format!("entity '{id}'"))) };
        let Some(crate::types::NodeKind::Trait(node)) = config.get(trait_id).map(|n| &n.kind) else {
            return Err(EngineError::NotFound(format!("trait '{trait_id}'")));
        };
        let layer_id = node.layer_id.clone();
        for replaced in node.selection.replaces.clone() {
            if let Some(layer) = entity.layers.get_mut(&layer_id) {
                layer.active.retain(|t| t != &replaced);
            }
        }
        let layer = entity.layers.entry(layer_id).or_default();
        if !layer.active.contains(&trait_id.to_string()) {
            layer.active.push(trait_id.to_string());
        }
        self.events.emit(Event::new(EventKind::TraitActivated, Some(id), serde_json::json!({ "traitId": trait_id })));
        cascade::run_batched(entity, &config, &self.events);
        Ok(())
    }

    pub async fn deactivate_trait(&self, id: uuid::Uuid, trait_id: &str) -> EngineResult<()> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let Some(entity) = guard.store.get_mut(id) else { return Err(EngineError::NotFound(format!("entity '{id}'"))) };
        for layer in entity.layers.values_mut() {
            layer.active.retain(|t| t != trait_id);
        }
        self.events.emit(Event::new(EventKind::TraitDeactivated, Some(id), serde_json::json!({ "traitId": trait_id })));
        cascade::run_batched(entity, &config, &self.events);
        Ok(())
    }

    pub async fn roll_layer(&self, id: uuid::Uuid, layer_id: &str) -> EngineResult<SelectionOutcome> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let rng = guard.rng.as_mut();
        let Some(entity) = guard.store.get_mut(id) else { return Err(EngineError::NotFound(format!("entity '{id}'"))) };
        let outcome = selection::roll_layer(entity, &config, layer_id, rng)?;
        if let SelectionOutcome::Selected(ids) = &outcome {
            let layer = entity.layers.entry(layer_id.to_string()).or_default();
            for trait_id in ids {
                if !layer.active.contains(trait_id) {
                    layer.active.push(trait_id.clone());
                }
            }
            cascade::run_batched(entity, &config, &self.events);
        }
        Ok(outcome)
    }

    pub async fn get_weights(&self, id: uuid::Uuid, layer_id: &str) -> EngineResult<Vec<(String, f64)>> {
        let config = self.config().await?;
        let guard = self.state.read().await;
        let entity = guard.store.get(id).ok_or_else(|| EngineError::NotFound(format!("entity '{id}'")))?;
        Ok(selection::layer_weights(entity, &config, layer_id))
    }

    /// `rollOutcome`: roll `layer_id` independently `n` times, applying
    /// each outcome as it's rolled (each roll sees the previous one's
    /// `replaces`/active-trait effects, matching repeated `rollLayer` calls).
    pub async fn roll_outcome(&self, id: uuid::Uuid, layer_id: &str, n: usize) -> EngineResult<Vec<SelectionOutcome>> {
        let mut outcomes = Vec::with_capacity(n);
        for _ in 0..n.max(1) {
            outcomes.push(self.roll_layer(id, layer_id).await?);
        }
        Ok(outcomes)
    }

    // -- Modifiers -----------------------------------------------------------

    pub async fn apply_modifier(&self, id: uuid::Uuid, mod_id: &str) -> EngineResult<()> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let entity = guard.store.get_mut(id).ok_or_else(|| EngineError::NotFound(format!("entity '{id}'")))?;
        crate::modifiers::apply_modifier(entity, &config, mod_id, false, &self.events);
        Ok(())
    }

    pub async fn remove_modifier(&self, id: uuid::Uuid, mod_id: &str) -> EngineResult<()> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let entity = guard.store.get_mut(id).ok_or_else(|| EngineError::NotFound(format!("entity '{id}'")))?;
        crate::modifiers::remove_modifier(entity, &config, mod_id, &self.events);
        Ok(())
    }

    // -- Actions --------------------------------------------------------------

    pub async fn is_action_available(&self, id: uuid::Uuid, action_id: &str) -> EngineResult<bool> {
        let config = self.config().await?;
        let guard = self.state.read().await;
        let entity = guard.store.get(id).ok_or_else(|| EngineError::NotFound(format!("entity '{id}'")))?;
        Ok(runtime::action_is_ready(entity, &config, action_id))
    }

    pub async fn get_action_cooldown(&self, id: uuid::Uuid, action_id: &str) -> EngineResult<f64> {
        let guard = self.state.read().await;
        let entity = guard.store.get(id).ok_or_else(|| EngineError::NotFound(format!("entity '{id}'")))?;
        Ok(entity.actions.get(action_id).map(|s| s.cooldown_remaining).unwrap_or(0.0))
    }

    /// `executeAction`: resets the action's cooldown and returns its
    /// opaque `effects` payload for the caller to interpret.
    pub async fn execute_action(&self, id: uuid::Uuid, action_id: &str) -> EngineResult<serde_json::Value> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let entity = guard.store.get_mut(id).ok_or_else(|| EngineError::NotFound(format!("entity '{id}'")))?;
        if !runtime::action_is_ready(entity, &config, action_id) {
            return Err(EngineError::InvariantViolation(format!("action '{action_id}' not ready")));
        }
        let Some(crate::types::NodeKind::Action(node)) = config.get(action_id).map(|n| &n.kind) else {
            return Err(EngineError::NotFound(format!("action '{action_id}'")));
        };
        entity.actions.entry(action_id.to_string()).or_default().cooldown_remaining = node.cooldown;
        Ok(node.effects.clone())
    }

    /// `getAvailableActions`: every action node ready right now for `id`.
    pub async fn get_available_actions(&self, id: uuid::Uuid) -> EngineResult<Vec<String>> {
        let config = self.config().await?;
        let guard = self.state.read().await;
        let entity = guard.store.get(id).ok_or_else(|| EngineError::NotFound(format!("entity '{id}'")))?;
        Ok(config
            .nodes_by_kind
            .get("action")
            .into_iter()
            .flatten()
            .filter(|action_id| runtime::action_is_ready(entity, &config, action_id))
            .cloned()
            .collect())
    }

    /// `selectAction`: weighted pick among the available actions, by each
    /// action node's `baseWeight`. `None` when nothing is available.
    pub async fn select_action(&self, id: uuid::Uuid) -> EngineResult<Option<String>> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let EngineState { store, rng, .. } = &mut *guard;
        let entity = store.get(id).ok_or_else(|| EngineError::NotFound(format!("entity '{id}'")))?;

        let candidates: Vec<(&String, f64)> = config
            .nodes_by_kind
            .get("action")
            .into_iter()
            .flatten()
            .filter(|action_id| runtime::action_is_ready(entity, &config, action_id))
            .filter_map(|action_id| match config.get(action_id).map(|n| &n.kind) {
                Some(crate::types::NodeKind::Action(node)) => Some((action_id, node.base_weight)),
                _ => None,
            })
            .collect();

        let total: f64 = candidates.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Ok(None);
        }
        let mut roll = rng.next_f64() * total;
        for (action_id, weight) in candidates {
            if roll < weight {
                return Ok(Some(action_id.clone()));
            }
            roll -= weight;
        }
        Ok(None)
    }

    // -- Query --------------------------------------------------------------

    pub async fn get_state(&self, id: uuid::Uuid) -> EngineResult<Entity> {
        let guard = self.state.read().await;
        guard.store.get(id).cloned().ok_or_else(|| EngineError::NotFound(format!("entity '{id}'")))
    }

    /// `query`: entities in `group` (or every stored entity when `None`),
    /// optionally filtered to active-only.
    pub async fn query(&self, group: Option<&str>, active_only: bool) -> Vec<uuid::Uuid> {
        self.state.read().await.store.query(group, active_only)
    }

    /// `previewInfluences`: the static relationship list targeting
    /// `node_id` — `(sourceId, relType, operation, value, scaling)` — since
    /// the operation takes a bare node id with no entity to evaluate
    /// liveness against.
    pub async fn preview_influences(&self, node_id: &str) -> EngineResult<Vec<InfluencePreview>> {
        let config = self.config().await?;
        Ok(config
            .relationships_targeting(node_id)
            .iter()
            .map(|rel| InfluencePreview {
                source_id: rel.source_id.clone(),
                rel_type: rel.rel_type.label(),
                operation: rel.config.operation,
                value: rel.config.value,
                scaling: rel.config.scaling,
            })
            .collect())
    }

    // -- Storage --------------------------------------------------------------

    pub async fn activate(&self, id: uuid::Uuid) -> bool {
        self.state.write().await.store.activate(id, &self.events)
    }

    pub async fn deactivate(&self, id: uuid::Uuid) -> bool {
        self.state.write().await.store.deactivate(id, &self.events)
    }

    pub async fn remove(&self, id: uuid::Uuid) -> Option<Entity> {
        self.state.write().await.store.remove(id, &self.events)
    }

    pub async fn snapshot(&self, id: uuid::Uuid, at: Timestamp) -> bool {
        self.state.write().await.store.snapshot(id, at, &self.events)
    }

    pub async fn rollback(&self, id: uuid::Uuid, at: Timestamp) -> EngineResult<()> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        if !guard.store.rollback(id, at, &self.events) {
            return Err(EngineError::NotFound(format!("no snapshot for entity '{id}' at or before {at}")));
        }
        if let Some(entity) = guard.store.get_mut(id) {
            cascade::run(entity, &config, &self.events);
        }
        Ok(())
    }

    pub async fn get_history(&self, id: uuid::Uuid) -> Vec<crate::types::Snapshot> {
        self.state.read().await.store.get_history(id)
    }

    // -- Groups ---------------------------------------------------------------

    pub async fn create_group(&self, group: &str) {
        self.state.write().await.store.create_group(group, &self.events);
    }

    pub async fn add_to_group(&self, group: &str, id: uuid::Uuid) {
        self.state.write().await.store.add_to_group(group, id, &self.events);
    }

    pub async fn remove_from_group(&self, group: &str, id: uuid::Uuid) -> bool {
        self.state.write().await.store.remove_from_group(group, id)
    }

    pub async fn get_group(&self, group: &str) -> Vec<uuid::Uuid> {
        self.state.read().await.store.group_members(group)
    }

    pub async fn list_groups(&self) -> Vec<String> {
        self.state.read().await.store.list_groups()
    }

    pub async fn delete_group(&self, group: &str) -> bool {
        self.state.write().await.store.delete_group(group)
    }

    // -- Pools ------------------------------------------------------------------

    pub async fn create_pool(&self, id: &str, name: &str, config: PoolConfig, rules: Vec<PoolRule>) {
        self.state.write().await.pools.create_pool(id, name, config, rules, &self.events);
    }

    pub async fn remove_pool(&self, id: &str) -> bool {
        self.state.write().await.pools.remove_pool(id, &self.events)
    }

    pub async fn configure_pool(&self, id: &str, config: PoolConfig) -> bool {
        self.state.write().await.pools.configure_pool(id, config, &self.events)
    }

    pub async fn set_pool_rules(&self, id: &str, rules: Vec<PoolRule>) -> bool {
        self.state.write().await.pools.set_pool_rules(id, rules, &self.events)
    }

    pub async fn acquire(&self, preset_id: Option<&str>, overrides: SpawnOverrides, target_pool_id: Option<&str>) -> EngineResult<uuid::Uuid> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let EngineState { pools, rng, store, .. } = &mut *guard;
        let entity = pools
            .acquire(&config, "default", preset_id, &overrides, target_pool_id, rng.as_mut(), &self.events)
            .ok_or_else(|| EngineError::NotFound("pool acquire failed".into()))?;
        let id = entity.id;
        store.store(entity, &self.events);
        store.activate(id, &self.events);
        Ok(id)
    }

    pub async fn release(&self, id: uuid::Uuid, target_pool_id: Option<&str>) -> EngineResult<bool> {
        let mut guard = self.state.write().await;
        let Some(entity) = guard.store.remove(id, &self.events) else {
            return Err(EngineError::NotFound(format!("entity '{id}'")));
        };
        Ok(guard.pools.release(entity, target_pool_id, &self.events))
    }

    /// Reassign `id` to `pool_id`, emitting `entityMovedPool`.
    pub async fn move_to_pool(&self, id: uuid::Uuid, pool_id: &str) -> EngineResult<()> {
        let mut guard = self.state.write().await;
        let entity = guard.store.get_mut(id).ok_or_else(|| EngineError::NotFound(format!("entity '{id}'")))?;
        entity.pool_id = Some(pool_id.to_string());
        self.events.emit(Event::new(EventKind::EntityMovedPool, Some(id), serde_json::json!({ "poolId": pool_id })));
        Ok(())
    }

    pub async fn get_pool_stats(&self, id: &str) -> Option<crate::pool::PoolStats> {
        self.state.read().await.pools.get(id).map(|p| p.stats.clone())
    }

    pub async fn get_all_pool_stats(&self) -> std::collections::HashMap<String, crate::pool::PoolStats> {
        self.state.read().await.pools.all_stats()
    }

    pub async fn list_pools(&self) -> Vec<String> {
        self.state.read().await.pools.list_ids()
    }

    /// `preWarmPool`: spawn `count` free entities directly into `pool_id`.
    pub async fn pre_warm_pool(&self, pool_id: &str, count: usize) -> EngineResult<usize> {
        let config = self.config().await?;
        let mut guard = self.state.write().await;
        let EngineState { pools, rng, .. } = &mut *guard;
        Ok(pools.pre_warm(&config, "default", pool_id, count, rng.as_mut(), &self.events))
    }

    pub async fn clear_pool(&self, pool_id: &str) -> usize {
        self.state.write().await.pools.clear_pool(pool_id)
    }

    /// `getPoolForEntity`: the entity's current pool, or the pool its rules
    /// would assign it to if it were acquired right now.
    pub async fn get_pool_for_entity(&self, id: uuid::Uuid) -> EngineResult<String> {
        let config = self.config().await?;
        let guard = self.state.read().await;
        let entity = guard.store.get(id).ok_or_else(|| EngineError::NotFound(format!("entity '{id}'")))?;
        Ok(guard.pools.assign_pool(&config, entity, entity.pool_id.as_deref()))
    }

    // -- Events -----------------------------------------------------------------

    pub fn on(&self, kind: EventKind, listener: Box<dyn Fn(&Event) + Send + Sync>) -> SubscriptionId {
        self.events.subscribe(kind, listener)
    }

    pub fn off(&self, kind: EventKind, id: SubscriptionId) {
        self.events.unsubscribe(kind, id);
    }
}
