//! Threshold Arbiter: variable-bound threshold trait activation/removal,
//! entity-wide modifier threshold evaluation with mutual-exclusion
//! arbitration and specificity ranking.

use std::collections::HashSet;

use condition_core::{ConditionNode, ConditionOperator, ConditionResolver};

use crate::cascade;
use crate::condition::EntityView;
use crate::config::ConfigIndex;
use crate::events::{Event, EventBus, EventKind};
use crate::types::{Entity, NodeKind};

/// `checkThresholds` (variable-level): for each threshold trait bound to
/// `var_id`, activate on `trigger`, deactivate on `autoRemove`.
pub fn check_thresholds(entity: &mut Entity, config: &ConfigIndex, var_id: &str, events: &EventBus) {
    let resolver = ConditionResolver::new();
    let Some(trait_ids) = config.threshold_traits_by_var.get(var_id).cloned() else { return };

    for trait_id in trait_ids {
        let Some(NodeKind::Trait(node)) = config.get(&trait_id).map(|n| &n.kind) else { continue };
        let Some(trigger) = &node.selection.trigger else { continue };
        let view = EntityView::new(entity);
        let active = entity.is_trait_active(&trait_id);

        if !active && resolver.evaluate(&trigger.conditions, &view).unwrap_or(false) {
            activate_threshold_trait(entity, &trait_id, &node.layer_id, events);
        } else if active {
            let should_remove = match &node.selection.auto_remove {
                Some(cond) => resolver.evaluate(cond, &view).unwrap_or(false),
                None => !resolver.evaluate(&trigger.conditions, &view).unwrap_or(false),
            };
            if should_remove {
                deactivate_threshold_trait(entity, &trait_id, &node.layer_id, events);
            }
        }
    }

    cascade::run_batched(entity, config, events);
}

fn activate_threshold_trait(entity: &mut Entity, trait_id: &str, layer_id: &str, events: &EventBus) {
    let layer = entity.layers.entry(layer_id.to_string()).or_default();
    if !layer.active.iter().any(|t| t == trait_id) {
        layer.active.push(trait_id.to_string());
        events.emit(Event::new(EventKind::TraitActivated, Some(entity.id), serde_json::json!({ "traitId": trait_id })));
    }
}

fn deactivate_threshold_trait(entity: &mut Entity, trait_id: &str, layer_id: &str, events: &EventBus) {
    if let Some(layer) = entity.layers.get_mut(layer_id) {
        layer.active.retain(|t| t != trait_id);
    }
    events.emit(Event::new(EventKind::TraitDeactivated, Some(entity.id), serde_json::json!({ "traitId": trait_id })));
}

/// `checkModifierThresholds` (entity-wide): resolve exclusive groups,
/// apply per-modifier trigger/removeConditions logic, flush the batched
/// cascade exactly once.
pub fn check_modifier_thresholds(entity: &mut Entity, config: &ConfigIndex, events: &EventBus) {
    cascade::begin_batch(entity);

    let groups = resolve_exclusive_groups(config);
    let mut decided: HashSet<String> = HashSet::new();

    for group in &groups {
        let winner = pick_group_winner(entity, config, group);
        for mod_id in group {
            decided.insert(mod_id.clone());
            let should_be_active = winner.as_deref() == Some(mod_id.as_str());
            apply_group_verdict(entity, config, mod_id, should_be_active, events);
        }
    }

    for mod_id in &config.threshold_modifiers {
        if decided.contains(mod_id) {
            continue;
        }
        apply_independent_verdict(entity, config, mod_id, events);
    }

    cascade::end_batch(entity, config, events);
}

/// Transitive closure over `ConfigIndex::exclusive_groups`' symmetric
/// adjacency, restricted to threshold modifiers, deduplicated into
/// disjoint equivalence classes.
fn resolve_exclusive_groups(config: &ConfigIndex) -> Vec<Vec<String>> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut groups = Vec::new();

    for mod_id in &config.threshold_modifiers {
        if visited.contains(mod_id) {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![mod_id.clone()];
        let mut seen = HashSet::new();
        seen.insert(mod_id.clone());

        while let Some(current) = stack.pop() {
            component.push(current.clone());
            visited.insert(current.clone());
            if let Some(neighbors) = config.exclusive_groups.get(&current) {
                for neighbor in neighbors {
                    if seen.insert(neighbor.clone()) {
                        stack.push(neighbor.clone());
                    }
                }
            }
        }

        if component.len() > 1 {
            component.sort_by_key(|id| config.threshold_modifiers.iter().position(|m| m == id).unwrap_or(usize::MAX));
            groups.push(component);
        }
    }
    groups
}

fn trigger_conditions(config: &ConfigIndex, mod_id: &str) -> Option<ConditionNode> {
    let NodeKind::Modifier(node) = &config.get(mod_id)?.kind else { return None };
    node.trigger.as_ref().map(|t| t.conditions.clone())
}

/// 0 qualify → all lose. 1 qualifies → it wins. >1 → most specific wins
/// (single-leaf same-target triggers compared by bound tightness; else
/// first-in-config-order).
fn pick_group_winner(entity: &Entity, config: &ConfigIndex, group: &[String]) -> Option<String> {
    let resolver = ConditionResolver::new();
    let view = EntityView::new(entity);

    let qualifying: Vec<&String> = group
        .iter()
        .filter(|id| trigger_conditions(config, id).map(|c| resolver.evaluate(&c, &view).unwrap_or(false)).unwrap_or(false))
        .collect();

    match qualifying.len() {
        0 => None,
        1 => Some(qualifying[0].clone()),
        _ => Some(most_specific(config, &qualifying).clone()),
    }
}

fn most_specific(config: &ConfigIndex, candidates: &[&String]) -> String {
    let leaves: Vec<Option<(String, ConditionOperator, f64)>> = candidates
        .iter()
        .map(|id| match trigger_conditions(config, id) {
            Some(ConditionNode::Leaf(leaf)) => Some((leaf.target.clone(), leaf.operator, leaf.value)),
            _ => None,
        })
        .collect();

    let same_target = leaves
        .iter()
        .all(|l| l.is_some())
        .then(|| leaves[0].as_ref().map(|(t, _, _)| t.clone()))
        .flatten()
        .is_some_and(|first| leaves.iter().all(|l| l.as_ref().unwrap().0 == first));

    if same_target {
        let lower_bound = leaves.iter().all(|l| matches!(l.as_ref().unwrap().1, ConditionOperator::Lt | ConditionOperator::Lte));
        let upper_bound = leaves.iter().all(|l| matches!(l.as_ref().unwrap().1, ConditionOperator::Gt | ConditionOperator::Gte));

        if lower_bound {
            let best = leaves.iter().enumerate().min_by(|a, b| {
                a.1.as_ref().unwrap().2.partial_cmp(&b.1.as_ref().unwrap().2).unwrap()
            });
            if let Some((i, _)) = best {
                return candidates[i].clone();
            }
        } else if upper_bound {
            let best = leaves.iter().enumerate().max_by(|a, b| {
                a.1.as_ref().unwrap().2.partial_cmp(&b.1.as_ref().unwrap().2).unwrap()
            });
            if let Some((i, _)) = best {
                return candidates[i].clone();
            }
        }
    }

    candidates[0].clone()
}

fn apply_group_verdict(entity: &mut Entity, config: &ConfigIndex, mod_id: &str, should_be_active: bool, events: &EventBus) {
    let active = entity.is_modifier_active(mod_id);
    if should_be_active && !active {
        crate::modifiers::apply_modifier(entity, config, mod_id, true, events);
    } else if !should_be_active && active {
        crate::modifiers::remove_modifier(entity, config, mod_id, events);
    }
}

fn apply_independent_verdict(entity: &mut Entity, config: &ConfigIndex, mod_id: &str, events: &EventBus) {
    let Some(NodeKind::Modifier(node)) = config.get(mod_id).map(|n| &n.kind) else { return };
    let Some(trigger) = &node.trigger else { return };
    let resolver = ConditionResolver::new();
    let view = EntityView::new(entity);
    let passes = resolver.evaluate(&trigger.conditions, &view).unwrap_or(false);
    let active = entity.is_modifier_active(mod_id);

    if !active && passes {
        crate::modifiers::apply_modifier(entity, config, mod_id, true, events);
    } else if active {
        let should_remove = match &trigger.remove_conditions {
            Some(cond) => resolver.evaluate(cond, &view).unwrap_or(false),
            None => !passes,
        };
        if should_remove {
            crate::modifiers::remove_modifier(entity, config, mod_id, events);
        }
    }
}
