//! Selection Core: weighted / pickN / allMatching / firstMatch trait
//! selection from a layer's pool, including eligibility, incompatibility,
//! and weight-influence application. `threshold` mode is never rolled
//! here — it is driven entirely by the Threshold Arbiter
//! (`runtime::threshold`).

use condition_core::ConditionResolver;
use tracing::warn;

use crate::condition::EntityView;
use crate::config::ConfigIndex;
use crate::error::{EngineError, EngineResult};
use crate::influence::{apply_weight_delta, relationship_is_live, resolve_relationship_value};
use crate::rng::RngSource;
use crate::types::{Entity, NodeKind, Operation, RelationshipType, SelectionMode, TraitNode};

/// Result of a selection attempt. `NoEligibleTraits` is a value, not an
/// exception.
#[derive(Debug, Clone)]
pub enum SelectionOutcome {
    Selected(Vec<String>),
    NoEligibleTraits,
}

struct Candidate {
    id: String,
    node: TraitNode,
    weight: f64,
}

/// Build the eligible pool for a layer: skip already-active traits,
/// threshold-mode traits, traits failing eligibility, and traits whose
/// `incompatibleWith` intersects the active set.
fn build_pool(entity: &Entity, config: &ConfigIndex, layer_id: &str) -> Vec<Candidate> {
    let resolver = ConditionResolver::new();
    let view = EntityView::new(entity);

    let Some(NodeKind::Layer(layer)) = config.get(layer_id).map(|n| &n.kind) else {
        return Vec::new();
    };

    let mut pool = Vec::new();
    for trait_id in &layer.trait_ids {
        let Some(node) = config.get(trait_id) else { continue };
        let NodeKind::Trait(trait_node) = &node.kind else { continue };

        if entity.is_trait_active(trait_id) {
            continue;
        }
        if trait_node.selection.mode == SelectionMode::Threshold {
            continue;
        }
        if trait_node.eligibility.iter().any(|c| !resolver.evaluate(c, &view).unwrap_or(false)) {
            continue;
        }
        if trait_node.incompatible_with.iter().any(|other| entity.is_trait_active(other)) {
            continue;
        }
        let gated = config
            .relationships_targeting(trait_id)
            .iter()
            .filter(|r| r.rel_type == RelationshipType::EligibilityGate)
            .any(|r| !relationship_is_live(r, entity, config));
        if gated {
            continue;
        }

        let weight = compute_weight(entity, config, trait_id, trait_node, layer.diminishing_returns);
        pool.push(Candidate { id: trait_id.clone(), node: trait_node.clone(), weight });
    }
    pool
}

fn compute_weight(entity: &Entity, config: &ConfigIndex, trait_id: &str, trait_node: &TraitNode, diminishing_returns: bool) -> f64 {
    let resolver = ConditionResolver::new();
    let view = EntityView::new(entity);

    let mut weight = trait_node.selection.base_weight;
    for modifier in &trait_node.selection.weight_modifiers {
        if resolver.evaluate(&modifier.condition, &view).unwrap_or(false) {
            weight = match modifier.operation {
                Operation::Add => weight + modifier.value,
                Operation::Multiply => weight * modifier.value,
                Operation::Set => modifier.value,
            };
        }
    }

    for rel in config.relationships_targeting(trait_id) {
        if rel.rel_type != RelationshipType::WeightInfluence {
            continue;
        }
        if !relationship_is_live(rel, entity, config) {
            continue;
        }
        let value = resolve_relationship_value(rel, entity, config);
        weight = apply_weight_delta(weight, trait_node.selection.base_weight, rel.config.operation, value, diminishing_returns);
    }

    weight.max(shared::constants::DEFAULT_WEIGHT_FLOOR)
}

/// Draw one winner from `pool` uniformly weighted, iterating in
/// insertion order so ties favor the earliest-inserted candidate.
fn weighted_draw(pool: &[Candidate], rng: &mut dyn RngSource) -> Option<usize> {
    let total: f64 = pool.iter().map(|c| c.weight).sum();
    if total <= 0.0 {
        return None;
    }
    let draw = rng.next_f64() * total;
    let mut cumulative = 0.0;
    for (i, c) in pool.iter().enumerate() {
        cumulative += c.weight;
        if draw < cumulative {
            return Some(i);
        }
    }
    pool.len().checked_sub(1)
}

/// Roll a layer according to its configured selection mode. `|active| ≤
/// maxItems` is enforced here regardless of mode: room is the layer's
/// `maxItems` minus however many traits are already active in it.
pub fn roll_layer(entity: &Entity, config: &ConfigIndex, layer_id: &str, rng: &mut dyn RngSource) -> EngineResult<SelectionOutcome> {
    let Some(NodeKind::Layer(layer)) = config.get(layer_id).map(|n| &n.kind) else {
        return Err(EngineError::NotFound(format!("layer '{layer_id}'")));
    };

    let already_active = entity.layers.get(layer_id).map(|l| l.active.len()).unwrap_or(0);
    let room = layer.selection.max_items.saturating_sub(already_active);
    if room == 0 {
        return Ok(SelectionOutcome::NoEligibleTraits);
    }

    Ok(match layer.selection.mode {
        SelectionMode::Weighted => roll_weighted(entity, config, layer_id, rng),
        SelectionMode::PickN => roll_pick_n(entity, config, layer_id, layer.selection.initial_rolls.max(1).min(room), rng),
        SelectionMode::AllMatching => roll_all_matching(entity, config, layer_id, room),
        SelectionMode::FirstMatch => roll_first_match(entity, config, layer_id),
        SelectionMode::Threshold => {
            warn!("roll_layer called on threshold-mode layer '{layer_id}'; threshold layers are arbiter-driven");
            SelectionOutcome::NoEligibleTraits
        }
    })
}

fn roll_weighted(entity: &Entity, config: &ConfigIndex, layer_id: &str, rng: &mut dyn RngSource) -> SelectionOutcome {
    let pool = build_pool(entity, config, layer_id);
    match weighted_draw(&pool, rng) {
        Some(i) => SelectionOutcome::Selected(vec![pool[i].id.clone()]),
        None => SelectionOutcome::NoEligibleTraits,
    }
}

/// `pickN`: N weighted draws without replacement; the remaining pool is
/// reweighted (recomputed) each iteration since activating a trait can
/// change incompatibility/eligibility for the rest. `n` is already
/// clamped to the layer's remaining room by the caller.
fn roll_pick_n(entity: &Entity, config: &ConfigIndex, layer_id: &str, n: usize, rng: &mut dyn RngSource) -> SelectionOutcome {
    let mut picked = Vec::new();
    let mut excluded: Vec<String> = Vec::new();

    for _ in 0..n {
        let mut pool = build_pool(entity, config, layer_id);
        pool.retain(|c| !excluded.contains(&c.id));
        match weighted_draw(&pool, rng) {
            Some(i) => {
                let id = pool[i].id.clone();
                excluded.push(id.clone());
                picked.push(id);
            }
            None => break,
        }
    }

    if picked.is_empty() {
        SelectionOutcome::NoEligibleTraits
    } else {
        SelectionOutcome::Selected(picked)
    }
}

fn roll_all_matching(entity: &Entity, config: &ConfigIndex, layer_id: &str, room: usize) -> SelectionOutcome {
    let mut pool = build_pool(entity, config, layer_id);
    if pool.is_empty() {
        return SelectionOutcome::NoEligibleTraits;
    }
    pool.truncate(room);
    SelectionOutcome::Selected(pool.into_iter().map(|c| c.id).collect())
}

fn roll_first_match(entity: &Entity, config: &ConfigIndex, layer_id: &str) -> SelectionOutcome {
    let pool = build_pool(entity, config, layer_id);
    match pool.into_iter().next() {
        Some(c) => SelectionOutcome::Selected(vec![c.id]),
        None => SelectionOutcome::NoEligibleTraits,
    }
}

/// The current weight of every eligible candidate in a layer, for the
/// `getWeights` query operation.
pub fn layer_weights(entity: &Entity, config: &ConfigIndex, layer_id: &str) -> Vec<(String, f64)> {
    build_pool(entity, config, layer_id).into_iter().map(|c| (c.id, c.weight)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::ScriptedRng;
    use std::collections::HashMap;

    fn variable_entity() -> Entity {
        Entity {
            id: uuid::Uuid::new_v4(),
            config_id: "cfg".into(),
            created_at: chrono::Utc::now(),
            preset_id: None,
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
            internal: crate::types::EntityInternal::default(),
            batching_cascade: false,
            cascade_dirty: false,
        }
    }

    fn config_with_two_traits() -> ConfigIndex {
        let json = r#"{
            "nodes": [
                {"id": "mood", "kind": "layer", "order": 0, "selection": {"mode": "Weighted", "max_items": 10, "initial_rolls": 1, "diminishing_returns": false}, "timing": {"roll_at": "Spawn", "reroll_allowed": false}, "trait_ids": ["happy", "sad"]},
                {"id": "happy", "kind": "trait", "layer_id": "mood", "selection": {"base_weight": 10, "mode": "Weighted", "weight_modifiers": [], "trigger": null, "auto_remove": null, "replaces": []}, "incompatible_with": ["sad"], "eligibility": [], "taxonomy": {}},
                {"id": "sad", "kind": "trait", "layer_id": "mood", "selection": {"base_weight": 30, "mode": "Weighted", "weight_modifiers": [], "trigger": null, "auto_remove": null, "replaces": []}, "incompatible_with": ["happy"], "eligibility": [], "taxonomy": {}}
            ]
        }"#;
        crate::config::ConfigStore::load_json(json).unwrap()
    }

    #[test]
    fn weighted_draw_picks_low_roll_as_first_candidate() {
        let entity = variable_entity();
        let config = config_with_two_traits();
        // total weight 40; draw 0.1*40=4 falls within 'happy' [0,10)
        let mut rng = ScriptedRng::new(vec![0.1]);
        let outcome = roll_layer(&entity, &config, "mood", &mut rng).unwrap();
        match outcome {
            SelectionOutcome::Selected(ids) => assert_eq!(ids, vec!["happy".to_string()]),
            SelectionOutcome::NoEligibleTraits => panic!("expected a selection"),
        }
    }

    #[test]
    fn incompatible_traits_exclude_each_other() {
        let entity = {
            let mut e = variable_entity();
            e.layers.insert("mood".into(), crate::types::LayerState { active: vec!["happy".into()], last_roll: None });
            e
        };
        let config = config_with_two_traits();
        let pool = build_pool(&entity, &config, "mood");
        assert!(pool.iter().all(|c| c.id != "happy" && c.id != "sad"));
    }

    #[test]
    fn empty_pool_reports_no_eligible_traits() {
        let entity = {
            let mut e = variable_entity();
            e.layers.insert("mood".into(), crate::types::LayerState { active: vec!["happy".into(), "sad".into()], last_roll: None });
            e
        };
        let config = config_with_two_traits();
        let mut rng = ScriptedRng::new(vec![0.5]);
        let outcome = roll_layer(&entity, &config, "mood", &mut rng).unwrap();
        assert!(matches!(outcome, SelectionOutcome::NoEligibleTraits));
    }
}
