//! Entity Spawner and Preset Trait Resolution.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::cascade;
use crate::config::{AttributeSpec, ConfigIndex, Preset, PresetTraitMode, PresetTraitSpec};
use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;
use crate::influence::relationship_is_live;
use crate::rng::RngSource;
use crate::selection;
use crate::types::{Entity, EntityInternal, LayerState, NodeKind, Operation, RollAt, VarState};

/// Overrides passed into `generate`/`spawn`: attribute values and
/// context values supplied by the caller, taking precedence over
/// preset/default resolution.
#[derive(Debug, Clone, Default)]
pub struct SpawnOverrides {
    pub attributes: HashMap<String, f64>,
    pub contexts: HashMap<String, JsonValue>,
}

/// Generate a fresh entity directly from a config, with no preset.
pub fn generate(config: &ConfigIndex, config_id: &str, overrides: &SpawnOverrides, rng: &mut dyn RngSource, events: &EventBus) -> EngineResult<Entity> {
    build_entity(config, config_id, None, overrides, &Preset::default(), rng, events)
}

/// Spawn from a named preset: merge its attribute specs, force traits,
/// then generate.
pub fn spawn(config: &ConfigIndex, config_id: &str, preset_id: &str, overrides: &SpawnOverrides, rng: &mut dyn RngSource, events: &EventBus) -> EngineResult<Entity> {
    let preset = config
        .presets
        .get(preset_id)
        .ok_or_else(|| EngineError::NotFound(format!("preset '{preset_id}'")))?
        .clone();
    build_entity(config, config_id, Some(preset_id.to_string()), overrides, &preset, rng, events)
}

fn build_entity(
    config: &ConfigIndex,
    config_id: &str,
    preset_id: Option<String>,
    overrides: &SpawnOverrides,
    preset: &Preset,
    rng: &mut dyn RngSource,
    events: &EventBus,
) -> EngineResult<Entity> {
    let mut entity = Entity {
        id: uuid::Uuid::new_v4(),
        config_id: config_id.to_string(),
        created_at: chrono::Utc::now(),
        preset_id: preset_id.clone(),
        attributes: HashMap::new(),
        variables: HashMap::new(),
        contexts: HashMap::new(),
        layers: HashMap::new(),
        modifiers: Vec::new(),
        modifier_states: HashMap::new(),
        compounds: Vec::new(),
        derived: HashMap::new(),
        actions: HashMap::new(),
        pool_id: None,
        internal: EntityInternal::default(),
        batching_cascade: false,
        cascade_dirty: false,
    };

    initialize_variables(&mut entity, config);
    initialize_contexts(&mut entity, config, preset, overrides);
    initialize_layer_containers(&mut entity, config);

    cascade::begin_batch(&mut entity);
    for (id, node) in spawn_order(config) {
        match node {
            SpawnItem::Attribute(attr) => {
                let value = if let Some(&ov) = overrides.attributes.get(&id) {
                    ov
                } else if let Some(spec) = preset.attributes.get(&id) {
                    resolve_attribute_spec(spec, rng).clamp(attr.min, attr.max)
                } else {
                    roll_attribute(&entity, config, &id, &attr, rng)
                };
                entity.attributes.insert(id, value);
            }
            SpawnItem::Layer(_) => {
                roll_layer_initial(&mut entity, config, &id, rng);
            }
        }
    }
    for (id, value) in &overrides.attributes {
        entity.attributes.entry(id.clone()).or_insert(*value);
    }
    cascade::end_batch(&mut entity, config, events);

    for (id, node) in &config.node_index {
        if let NodeKind::Action(_) = &node.kind {
            entity.actions.entry(id.clone()).or_default();
        }
    }

    if !preset.traits.is_empty() {
        force_preset_traits(&mut entity, config, preset, rng, events);
    }

    cascade::run(&mut entity, config, events);
    Ok(entity)
}

/// Reset a pooled entity for reuse: regenerate id/`createdAt`, re-roll
/// attributes (respecting preset specs), reset variables to `initial`,
/// clear transient collections,
/// re-roll initial layers, re-force any preset traits, run cascade.
pub fn reset_for_reuse(entity: &mut Entity, config: &ConfigIndex, preset_id: Option<&str>, overrides: &SpawnOverrides, rng: &mut dyn RngSource, events: &EventBus) {
    let preset = preset_id.and_then(|id| config.presets.get(id)).cloned().unwrap_or_default();

    entity.id = uuid::Uuid::new_v4();
    entity.created_at = chrono::Utc::now();
    entity.preset_id = preset_id.map(str::to_string);
    entity.layers.clear();
    entity.modifiers.clear();
    entity.modifier_states.clear();
    entity.compounds.clear();
    entity.derived.clear();
    entity.internal.log.clear();
    initialize_layer_containers(entity, config);

    for var_id in entity.variables.keys().cloned().collect::<Vec<_>>() {
        let Some(NodeKind::Variable(node)) = config.get(&var_id).map(|n| &n.kind) else { continue };
        let state = entity.variables.get_mut(&var_id).unwrap();
        state.value = node.initial;
        state.current_rate = node.base_rate;
    }

    cascade::begin_batch(entity);
    for (id, node) in spawn_order(config) {
        match node {
            SpawnItem::Attribute(attr) => {
                let value = if let Some(&ov) = overrides.attributes.get(&id) {
                    ov
                } else if let Some(spec) = preset.attributes.get(&id) {
                    resolve_attribute_spec(spec, rng).clamp(attr.min, attr.max)
                } else {
                    roll_attribute(entity, config, &id, &attr, rng)
                };
                entity.attributes.insert(id, value);
            }
            SpawnItem::Layer(_) => {
                roll_layer_initial(entity, config, &id, rng);
            }
        }
    }
    cascade::end_batch(entity, config, events);

    if !preset.traits.is_empty() {
        force_preset_traits(entity, config, &preset, rng, events);
    }

    cascade::run(entity, config, events);
}

fn initialize_variables(entity: &mut Entity, config: &ConfigIndex) {
    let Some(var_ids) = config.nodes_by_kind.get("variable") else { return };
    for id in var_ids {
        let Some(NodeKind::Variable(node)) = config.get(id).map(|n| &n.kind) else { continue };
        entity.variables.insert(
            id.clone(),
            VarState {
                value: node.initial,
                base_rate: node.base_rate,
                current_rate: node.base_rate,
                min: node.min,
                max: node.max,
                change_mode: node.change_mode,
                direction: node.direction,
            },
        );
    }
}

fn initialize_contexts(entity: &mut Entity, config: &ConfigIndex, preset: &Preset, overrides: &SpawnOverrides) {
    let Some(ctx_ids) = config.nodes_by_kind.get("context") else { return };
    for id in ctx_ids {
        let Some(NodeKind::Context(node)) = config.get(id).map(|n| &n.kind) else { continue };
        let value = overrides
            .contexts
            .get(id)
            .or_else(|| preset.contexts.get(id))
            .cloned()
            .unwrap_or_else(|| node.default.clone());
        entity.contexts.insert(id.clone(), value);
    }
}

fn initialize_layer_containers(entity: &mut Entity, config: &ConfigIndex) {
    let Some(layer_ids) = config.nodes_by_kind.get("layer") else { return };
    for id in layer_ids {
        entity.layers.entry(id.clone()).or_insert_with(LayerState::default);
    }
}

enum SpawnItem {
    Attribute(crate::types::AttributeNode),
    Layer(crate::types::LayerNode),
}

/// `spawnOrder`: attributes (sorted by `spawnOrder`) concatenated with
/// layers rolling at spawn/create (sorted by `order`), then a final
/// global ascending sort by `order`.
fn spawn_order(config: &ConfigIndex) -> Vec<(String, SpawnItem)> {
    let mut attrs: Vec<(String, i32, crate::types::AttributeNode)> = config
        .nodes_by_kind
        .get("attribute")
        .into_iter()
        .flatten()
        .filter_map(|id| match config.get(id).map(|n| &n.kind) {
            Some(NodeKind::Attribute(a)) => Some((id.clone(), a.spawn_order, a.clone())),
            _ => None,
        })
        .collect();
    attrs.sort_by_key(|(_, order, _)| *order);

    let mut layers: Vec<(String, i32, crate::types::LayerNode)> = config
        .nodes_by_kind
        .get("layer")
        .into_iter()
        .flatten()
        .filter_map(|id| match config.get(id).map(|n| &n.kind) {
            Some(NodeKind::Layer(l)) if matches!(l.timing.roll_at, RollAt::Spawn | RollAt::Create) => {
                Some((id.clone(), l.order, l.clone()))
            }
            _ => None,
        })
        .collect();
    layers.sort_by_key(|(_, order, _)| *order);

    let mut combined: Vec<(String, i32, SpawnItem)> = attrs
        .into_iter()
        .map(|(id, order, a)| (id, order, SpawnItem::Attribute(a)))
        .chain(layers.into_iter().map(|(id, order, l)| (id, order, SpawnItem::Layer(l))))
        .collect();
    combined.sort_by_key(|(_, order, _)| *order);
    combined.into_iter().map(|(id, _, item)| (id, item)).collect()
}

fn roll_attribute(entity: &Entity, config: &ConfigIndex, attr_id: &str, node: &crate::types::AttributeNode, rng: &mut dyn RngSource) -> f64 {
    let (mut min, mut max) = node.default_range;
    if min == 0.0 && max == 0.0 {
        min = node.min;
        max = node.max;
    }

    for rel in config.relationships_targeting(attr_id) {
        if rel.rel_type != crate::types::RelationshipType::ValueModifier {
            continue;
        }
        if !relationship_is_live(rel, entity, config) {
            continue;
        }
        match rel.config.operation {
            Operation::Add => {
                min += rel.config.value;
                max += rel.config.value;
            }
            Operation::Multiply => {
                min *= rel.config.value;
                max *= rel.config.value;
            }
            Operation::Set => {
                min = rel.config.value;
                max = rel.config.value;
            }
        }
    }

    let span = (max - min).max(0.0);
    let raw = min + rng.next_f64() * span;
    shared::round_to_precision(raw, node.precision).clamp(node.min, node.max)
}

fn roll_layer_initial(entity: &mut Entity, config: &ConfigIndex, layer_id: &str, rng: &mut dyn RngSource) {
    let Some(NodeKind::Layer(layer)) = config.get(layer_id).map(|n| &n.kind) else { return };
    for _ in 0..layer.selection.initial_rolls.max(1) {
        if let Ok(selection::SelectionOutcome::Selected(ids)) = selection::roll_layer(entity, config, layer_id, rng) {
            let state = entity.layers.entry(layer_id.to_string()).or_default();
            for id in ids {
                if !state.active.contains(&id) {
                    state.active.push(id);
                }
            }
        }
    }
}

/// Resolve and force-activate a preset's `traits` field for every
/// configured layer.
fn force_preset_traits(entity: &mut Entity, config: &ConfigIndex, preset: &Preset, rng: &mut dyn RngSource, _events: &EventBus) {
    for (layer_id, spec) in &preset.traits {
        let ids = resolve_preset_trait_spec(config, layer_id, spec, rng);
        let state = entity.layers.entry(layer_id.clone()).or_default();
        for id in ids {
            if !state.active.contains(&id) {
                state.active.push(id);
            }
        }
    }
}

fn resolve_preset_trait_spec(config: &ConfigIndex, layer_id: &str, spec: &PresetTraitSpec, rng: &mut dyn RngSource) -> Vec<String> {
    match spec {
        PresetTraitSpec::Single(id) => vec![id.clone()],
        PresetTraitSpec::Multiple(ids) => ids.clone(),
        PresetTraitSpec::Mode(mode_spec) => match mode_spec.mode {
            PresetTraitMode::All => mode_spec.pool.iter().map(|e| e.id().to_string()).collect(),
            PresetTraitMode::Weighted => weighted_pick(&mode_spec.pool, rng).into_iter().collect(),
            PresetTraitMode::Chance => {
                if rng.next_f64() < mode_spec.chance.unwrap_or(0.0) {
                    let uniform: f64 = rng.next_f64();
                    let idx = ((uniform * mode_spec.pool.len() as f64) as usize).min(mode_spec.pool.len().saturating_sub(1));
                    mode_spec.pool.get(idx).map(|e| vec![e.id().to_string()]).unwrap_or_default()
                } else {
                    Vec::new()
                }
            }
            PresetTraitMode::PickN => {
                let n = mode_spec.n.unwrap_or(1);
                let mut pool = mode_spec.pool.clone();
                let mut picked = Vec::new();
                for _ in 0..n {
                    if pool.is_empty() {
                        break;
                    }
                    if let Some(id) = weighted_pick(&pool, rng) {
                        pool.retain(|e| e.id() != id);
                        picked.push(id);
                    }
                }
                picked
            }
            PresetTraitMode::TaxonomyFilter => {
                let Some(NodeKind::Layer(layer)) = config.get(layer_id).map(|n| &n.kind) else { return Vec::new() };
                layer
                    .trait_ids
                    .iter()
                    .filter(|id| match config.get(id).map(|n| &n.kind) {
                        Some(NodeKind::Trait(t)) => mode_spec.taxonomy.iter().all(|(k, v)| t.taxonomy.get(k) == Some(v)),
                        _ => false,
                    })
                    .cloned()
                    .collect()
            }
        },
    }
}

fn weighted_pick(pool: &[crate::config::PoolEntry], rng: &mut dyn RngSource) -> Option<String> {
    let total: f64 = pool.iter().map(|e| e.weight()).sum();
    if total <= 0.0 || pool.is_empty() {
        return None;
    }
    let draw = rng.next_f64() * total;
    let mut cumulative = 0.0;
    for entry in pool {
        cumulative += entry.weight();
        if draw < cumulative {
            return Some(entry.id().to_string());
        }
    }
    pool.last().map(|e| e.id().to_string())
}

/// Resolve an `AttributeSpec` preset override into a concrete value,
/// rolling a range/variance with `rng` as needed.
pub fn resolve_attribute_spec(spec: &AttributeSpec, rng: &mut dyn RngSource) -> f64 {
    match spec {
        AttributeSpec::Fixed(v) => *v,
        AttributeSpec::Value { value } => *value,
        AttributeSpec::Range { min, max } => min + rng.next_f64() * (max - min),
        AttributeSpec::Variance { base, variance } => base + (rng.next_f64() * 2.0 - 1.0) * variance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SeededRng;

    fn minimal_config() -> ConfigIndex {
        let json = r#"{"nodes": [
            {"id": "strength", "kind": "attribute", "min": 0, "max": 100, "default_range": [10, 20], "precision": 0, "spawn_order": 0},
            {"id": "hunger", "kind": "variable", "min": 0, "max": 100, "initial": 80, "base_rate": -5, "change_mode": "Timed", "direction": "Deplete"}
        ]}"#;
        crate::config::ConfigStore::load_json(json).unwrap()
    }

    #[test]
    fn generate_initializes_variables_and_rolls_attribute_within_range() {
        let config = minimal_config();
        let mut rng = SeededRng::new(7);
        let events = EventBus::new();
        let entity = generate(&config, "cfg", &SpawnOverrides::default(), &mut rng, &events).unwrap();
        assert_eq!(entity.variables["hunger"].value, 80.0);
        let strength = entity.attributes["strength"];
        assert!((10.0..=20.0).contains(&strength));
    }

    #[test]
    fn override_attribute_takes_precedence_over_roll() {
        let config = minimal_config();
        let mut rng = SeededRng::new(1);
        let events = EventBus::new();
        let overrides = SpawnOverrides { attributes: HashMap::from([("strength".to_string(), 99.0)]), contexts: HashMap::new() };
        let entity = generate(&config, "cfg", &overrides, &mut rng, &events).unwrap();
        assert_eq!(entity.attributes["strength"], 99.0);
    }
}
