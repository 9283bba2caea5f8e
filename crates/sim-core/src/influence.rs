//! Shared relationship-resolution helpers used by both the Selection Core
//! (`weight_influence`) and the Cascade Engine (`rate_modifier`,
//! `value_modifier`): whether a relationship is currently "live" against
//! an entity, and the numeric delta/factor it contributes once scaling
//! and inversion are applied.

use condition_core::ConditionResolver;

use crate::condition::{get_node_value_by_id, EntityView};
use crate::config::ConfigIndex;
use crate::types::{Entity, Node, NodeKind, Operation, Relationship, Scaling};

/// `true` if `rel`'s source is currently active and its own `conditions`
/// all pass. "Active" for an attribute/variable/context/derived/action
/// source means simply present; for a trait/modifier/compound source it
/// means membership.
pub fn relationship_is_live(rel: &Relationship, entity: &Entity, config: &ConfigIndex) -> bool {
    let source_active = match config.get(&rel.source_id).map(|n| &n.kind) {
        Some(NodeKind::Trait(_)) => entity.is_trait_active(&rel.source_id),
        Some(NodeKind::Modifier(_)) => entity.is_modifier_active(&rel.source_id),
        Some(NodeKind::Compound(_)) => entity.is_compound_active(&rel.source_id),
        Some(_) | None => true,
    };
    if !source_active {
        return false;
    }

    let resolver = ConditionResolver::new();
    let view = EntityView::new(entity);
    rel.conditions.iter().all(|c| resolver.evaluate(c, &view).unwrap_or(false))
}

/// Resolve `rel`'s configured value, applying `perPoint` scaling and
/// `invert` against the source node's current value and (when inverted)
/// its declared max.
pub fn resolve_relationship_value(rel: &Relationship, entity: &Entity, config: &ConfigIndex) -> f64 {
    let mut value = rel.config.value;
    if rel.config.scaling == Scaling::PerPoint {
        let source_value = get_node_value_by_id(entity, &rel.source_id).unwrap_or(0.0);
        if rel.config.invert {
            let max = source_max(&rel.source_id, config).unwrap_or(source_value);
            value *= max - source_value;
        } else {
            value *= source_value;
        }
    }
    value
}

fn source_max(source_id: &str, config: &ConfigIndex) -> Option<f64> {
    match config.get(source_id).map(|n: &Node| &n.kind) {
        Some(NodeKind::Attribute(a)) => Some(a.max),
        Some(NodeKind::Variable(v)) => Some(v.max),
        _ => None,
    }
}

/// Fold a `Δ` for weighted-selection influence, applying diminishing
/// returns (`sign(Δ)·√|Δ|·√baseWeight`) when the layer requests it and
/// the relationship's operation is `add`. `multiply` is never dampened.
/// The anchor for the damping formula is the trait's original
/// `baseWeight`, not the running weight — see DESIGN.md for why.
pub fn apply_weight_delta(weight: f64, base_weight: f64, operation: Operation, value: f64, diminishing_returns: bool) -> f64 {
    match operation {
        Operation::Add => {
            let delta = if diminishing_returns {
                value.signum() * value.abs().sqrt() * base_weight.sqrt()
            } else {
                value
            };
            weight + delta
        }
        Operation::Multiply => weight * value,
        Operation::Set => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diminishing_returns_matches_s4_scenario() {
        // S4: baseWeight=16, two sources each contributing add value=9.
        // Effective weight = 16 + 2*(1*sqrt(9)*sqrt(16)) = 16 + 2*12 = 40.
        let mut weight = 16.0;
        for _ in 0..2 {
            weight = apply_weight_delta(weight, 16.0, Operation::Add, 9.0, true);
        }
        assert_eq!(weight, 40.0);
    }

    #[test]
    fn multiply_is_never_dampened() {
        let weight = apply_weight_delta(10.0, 10.0, Operation::Multiply, 2.0, true);
        assert_eq!(weight, 20.0);
    }
}
