//! Cascade Engine: the `recalculateRates → checkCompounds →
//! calculateDerived` triple run as one atomic, batchable recalculation.
//!
//! `run` performs all three stages unconditionally; `run_batched` is the
//! entry point every mutation goes through — while `entity.batching_cascade`
//! is set it only flags `cascade_dirty` and returns, deferring the actual
//! recompute to whoever clears the batch flag.

use std::collections::HashMap;

use condition_core::ConditionResolver;

use crate::condition::EntityView;
use crate::config::ConfigIndex;
use crate::events::{Event, EventBus, EventKind};
use crate::influence::{relationship_is_live, resolve_relationship_value};
use crate::types::{CompoundRequirement, Entity, NodeKind, Operation, RelationshipType, RequirementLogic};

/// Run the cascade triple immediately, ignoring the batching flag. Used
/// internally by `run_batched` once the batch window closes.
pub fn run(entity: &mut Entity, config: &ConfigIndex, events: &EventBus) {
    recalculate_rates(entity, config);
    check_compounds(entity, config, events);
    calculate_derived(entity, config);
}

/// The entry point every mutating operation should call instead of
/// `run` directly: while a batch is open, coalesce into a single
/// deferred recompute.
pub fn run_batched(entity: &mut Entity, config: &ConfigIndex, events: &EventBus) {
    if entity.batching_cascade {
        entity.cascade_dirty = true;
        return;
    }
    run(entity, config, events);
}

/// Open a batch window: subsequent `run_batched` calls only mark dirty.
pub fn begin_batch(entity: &mut Entity) {
    entity.batching_cascade = true;
}

/// Close a batch window, running the cascade exactly once if anything
/// was marked dirty while it was open.
pub fn end_batch(entity: &mut Entity, config: &ConfigIndex, events: &EventBus) {
    entity.batching_cascade = false;
    if entity.cascade_dirty {
        entity.cascade_dirty = false;
        run(entity, config, events);
    }
}

/// Stage 1: reset every variable's `currentRate` to `baseRate`, then fold
/// every live `rate_modifier` relationship targeting it.
fn recalculate_rates(entity: &mut Entity, config: &ConfigIndex) {
    let var_ids: Vec<String> = entity.variables.keys().cloned().collect();
    for var_id in var_ids {
        let Some(NodeKind::Variable(node)) = config.get(&var_id).map(|n| &n.kind) else { continue };
        let mut rate = node.base_rate;

        for rel in config.relationships_targeting(&var_id) {
            if rel.rel_type != RelationshipType::RateModifier {
                continue;
            }
            if !relationship_is_live(rel, entity, config) {
                continue;
            }
            let value = resolve_relationship_value(rel, entity, config);
            rate = match rel.config.operation {
                Operation::Add => rate + value,
                Operation::Multiply => rate * value,
                Operation::Set => value,
            };
        }

        if let Some(state) = entity.variables.get_mut(&var_id) {
            state.current_rate = rate;
        }
    }
}

/// Stage 2: for each compound, evaluate `requires[]`/`requirementLogic`
/// and append/splice membership, emitting activation/deactivation events
/// on transition.
fn check_compounds(entity: &mut Entity, config: &ConfigIndex, events: &EventBus) {
    let compound_ids: Vec<String> = config.nodes_by_kind.get("compound").cloned().unwrap_or_default();
    for compound_id in compound_ids {
        let Some(NodeKind::Compound(node)) = config.get(&compound_id).map(|n| &n.kind) else { continue };
        let satisfied = check_requirements(entity, config, &node.requires, node.requirement_logic);
        let was_active = entity.compounds.iter().any(|c| c == &compound_id);

        if satisfied && !was_active {
            entity.compounds.push(compound_id.clone());
            events.emit(Event::new(
                EventKind::CompoundActivated,
                Some(entity.id),
                serde_json::json!({ "compoundId": compound_id }),
            ));
        } else if !satisfied && was_active {
            entity.compounds.retain(|c| c != &compound_id);
            events.emit(Event::new(
                EventKind::CompoundDeactivated,
                Some(entity.id),
                serde_json::json!({ "compoundId": compound_id }),
            ));
        }
    }
}

fn check_requirements(entity: &Entity, config: &ConfigIndex, requires: &[CompoundRequirement], logic: RequirementLogic) -> bool {
    let resolver = ConditionResolver::new();
    let view = EntityView::new(entity);

    let mut results = requires.iter().map(|req| match req {
        CompoundRequirement::Id { id } => {
            entity.is_trait_active(id) || entity.is_modifier_active(id) || entity.is_compound_active(id)
        }
        CompoundRequirement::Threshold { id, operator, value } => {
            let Some(current) = crate::condition::get_node_value_by_id(entity, id) else { return false };
            compare(current, *operator, *value)
        }
        CompoundRequirement::Condition { condition } => resolver.evaluate(condition, &view).unwrap_or(false),
    });

    match logic {
        RequirementLogic::All => results.all(|r| r),
        RequirementLogic::Any => results.any(|r| r),
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

/// Stage 3: evaluate every derived formula against a flat context of
/// attributes, variable values, and numeric-coercible contexts, clamped
/// to `[min,max]`. A formula that fails to evaluate writes `0`.
fn calculate_derived(entity: &mut Entity, config: &ConfigIndex) {
    let derived_ids: Vec<String> = config.nodes_by_kind.get("derived").cloned().unwrap_or_default();
    if derived_ids.is_empty() {
        return;
    }

    let mut context: HashMap<String, f64> = HashMap::new();
    for (id, value) in &entity.attributes {
        context.insert(id.clone(), *value);
    }
    for (id, state) in &entity.variables {
        context.insert(id.clone(), state.value);
    }
    for (id, value) in &entity.contexts {
        if let Some(n) = value.as_f64() {
            context.insert(id.clone(), n);
        }
    }

    for derived_id in derived_ids {
        let Some(NodeKind::Derived(node)) = config.get(&derived_id).map(|n| &n.kind) else { continue };
        let value = match config.formula_cache.get(&node.formula) {
            Some(compiled) => compiled.eval(&context).clamp(node.min, node.max),
            None => {
                tracing::warn!("derived node '{derived_id}' has no cached formula; writing 0");
                0.0
            }
        };
        entity.derived.insert(derived_id, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use std::collections::HashMap as Map;

    fn blank_entity() -> Entity {
        Entity {
            id: uuid::Uuid::new_v4(),
            config_id: "cfg".into(),
            created_at: chrono::Utc::now(),
            preset_id: None,
            attributes: Map::new(),
            variables: Map::new(),
            contexts: Map::new(),
            layers: Map::new(),
            modifiers: Vec::new(),
            modifier_states: Map::new(),
            compounds: Vec::new(),
            derived: Map::new(),
            actions: Map::new(),
            pool_id: None,
            internal: EntityInternal::default(),
            batching_cascade: false,
            cascade_dirty: false,
        }
    }

    fn config_with_rate_modifier() -> ConfigIndex {
        let json = r#"{
            "nodes": [
                {"id": "hunger", "kind": "variable", "min": 0, "max": 100, "initial": 60, "base_rate": -5, "change_mode": "Timed", "direction": "Deplete"},
                {"id": "mod_fast_hunger", "kind": "modifier", "duration_type": "Permanent", "duration": 0, "stacking": "Ignore", "max_stacks": 1, "trigger": null, "exclusive_with": []}
            ],
            "relationships": [
                {"source_id": "mod_fast_hunger", "target_id": "hunger", "rel_type": "RateModifier", "config": {"operation": "Add", "value": -3, "scaling": "Flat", "per_point_source": null, "invert": false}, "conditions": []}
            ]
        }"#;
        crate::config::ConfigStore::load_json(json).unwrap()
    }

    #[test]
    fn recalculate_rates_folds_live_rate_modifiers() {
        let config = config_with_rate_modifier();
        let mut entity = blank_entity();
        entity.variables.insert("hunger".into(), VarState {
            value: 60.0, base_rate: -5.0, current_rate: -5.0, min: 0.0, max: 100.0,
            change_mode: ChangeMode::Timed, direction: Direction::Deplete,
        });
        entity.modifier_states.insert("mod_fast_hunger".into(), ModState {
            applied_at: chrono::Utc::now(), stacks: 1, is_static: false, expires_at: None, ticks_remaining: None,
        });

        recalculate_rates(&mut entity, &config);
        assert_eq!(entity.variables["hunger"].current_rate, -8.0);
    }

    #[test]
    fn inactive_modifier_does_not_contribute_rate() {
        let config = config_with_rate_modifier();
        let mut entity = blank_entity();
        entity.variables.insert("hunger".into(), VarState {
            value: 60.0, base_rate: -5.0, current_rate: -5.0, min: 0.0, max: 100.0,
            change_mode: ChangeMode::Timed, direction: Direction::Deplete,
        });

        recalculate_rates(&mut entity, &config);
        assert_eq!(entity.variables["hunger"].current_rate, -5.0);
    }

    #[test]
    fn derived_formula_clamps_to_bounds() {
        let json = r#"{
            "nodes": [
                {"id": "power", "kind": "attribute", "min": 0, "max": 1000, "default_range": [0, 0], "precision": 0, "spawn_order": 0},
                {"id": "overpower", "kind": "derived", "formula": "power * 10", "min": 0, "max": 50}
            ]
        }"#;
        let config = crate::config::ConfigStore::load_json(json).unwrap();
        let mut entity = blank_entity();
        entity.attributes.insert("power".into(), 20.0);
        calculate_derived(&mut entity, &config);
        assert_eq!(entity.derived["overpower"], 50.0);
    }

    #[test]
    fn batched_cascade_runs_once_at_flush() {
        let config = config_with_rate_modifier();
        let mut entity = blank_entity();
        entity.variables.insert("hunger".into(), VarState {
            value: 60.0, base_rate: -5.0, current_rate: -5.0, min: 0.0, max: 100.0,
            change_mode: ChangeMode::Timed, direction: Direction::Deplete,
        });
        let events = EventBus::new();

        begin_batch(&mut entity);
        run_batched(&mut entity, &config, &events);
        run_batched(&mut entity, &config, &events);
        assert_eq!(entity.variables["hunger"].current_rate, -5.0, "deferred while batching");

        end_batch(&mut entity, &config, &events);
        assert_eq!(entity.variables["hunger"].current_rate, -5.0, "no rate modifier was live yet");
    }
}
