//! The condition resolver: synchronous evaluation of a [`ConditionNode`]
//! tree against anything implementing [`ConditionTarget`].
//!
//! No I/O, no async — conditions are evaluated inline on every cascade
//! pass and threshold check, directly against already-resolved entity
//! state.

use crate::error::{ConditionError, ConditionResult};
use crate::types::{Condition, ConditionItem, ConditionKind, ConditionNode, ConditionTarget, Connector};

/// Stateless evaluator for condition trees.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionResolver;

impl ConditionResolver {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a full tree against `target`.
    pub fn evaluate(&self, node: &ConditionNode, target: &dyn ConditionTarget) -> ConditionResult<bool> {
        match node {
            ConditionNode::Leaf(condition) => Ok(self.evaluate_leaf(condition, target)),
            ConditionNode::All(nodes) => {
                for n in nodes {
                    if !self.evaluate(n, target)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            ConditionNode::Any(nodes) => {
                for n in nodes {
                    if self.evaluate(n, target)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            ConditionNode::Not(inner) => Ok(!self.evaluate(inner, target)?),
            ConditionNode::Group(items) => self.evaluate_group(items, target),
        }
    }

    /// A single leaf: dispatch to membership testing or numeric comparison.
    fn evaluate_leaf(&self, condition: &Condition, target: &dyn ConditionTarget) -> bool {
        if condition.operator.is_membership() {
            let active = target.is_active(condition.kind, &condition.target);
            match condition.operator {
                crate::types::ConditionOperator::Active => active,
                crate::types::ConditionOperator::Inactive => !active,
                _ => unreachable!(),
            }
        } else {
            match target.node_value(condition.kind, &condition.target) {
                Some(actual) => condition.operator.apply(actual, condition.value),
                // Missing/non-numeric node: the comparison is vacuously false.
                None => false,
            }
        }
    }

    /// Fold an ordered list left-to-right using each item's connector. The
    /// first item's own connector is ignored since there is nothing to its
    /// left to fold with.
    fn evaluate_group(&self, items: &[ConditionItem], target: &dyn ConditionTarget) -> ConditionResult<bool> {
        let mut iter = items.iter();
        let first = iter.next().ok_or(ConditionError::EmptyGroup)?;
        let mut acc = self.evaluate(&first.node, target)?;

        for item in iter {
            let next = self.evaluate(&item.node, target)?;
            acc = match item.connector {
                Connector::And => acc && next,
                Connector::Or => acc || next,
            };
        }

        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConditionOperator;
    use std::collections::HashMap;

    struct FakeEntity {
        values: HashMap<(ConditionKind, &'static str), f64>,
        active: HashMap<(ConditionKind, &'static str), bool>,
    }

    impl ConditionTarget for FakeEntity {
        fn node_value(&self, kind: ConditionKind, target: &str) -> Option<f64> {
            self.values.iter().find(|((k, t), _)| *k == kind && *t == target).map(|(_, v)| *v)
        }

        fn is_active(&self, kind: ConditionKind, target: &str) -> bool {
            self.active.iter().any(|((k, t), v)| *k == kind && *t == target && *v)
        }
    }

    fn leaf(kind: ConditionKind, target: &str, op: ConditionOperator, value: f64) -> ConditionNode {
        ConditionNode::Leaf(Condition::new(kind, target, op, value))
    }

    #[test]
    fn missing_node_compares_false() {
        let entity = FakeEntity { values: HashMap::new(), active: HashMap::new() };
        let node = leaf(ConditionKind::Attribute, "strength", ConditionOperator::Gt, 10.0);
        assert!(!ConditionResolver::new().evaluate(&node, &entity).unwrap());
    }

    #[test]
    fn all_short_circuits_on_first_false() {
        let mut values = HashMap::new();
        values.insert((ConditionKind::Attribute, "strength"), 5.0);
        let entity = FakeEntity { values, active: HashMap::new() };

        let tree = ConditionNode::All(vec![
            leaf(ConditionKind::Attribute, "strength", ConditionOperator::Gt, 10.0),
            leaf(ConditionKind::Attribute, "strength", ConditionOperator::Gt, 0.0),
        ]);
        assert!(!ConditionResolver::new().evaluate(&tree, &entity).unwrap());
    }

    #[test]
    fn ordered_group_folds_with_connectors() {
        let mut values = HashMap::new();
        values.insert((ConditionKind::Attribute, "strength"), 15.0);
        values.insert((ConditionKind::Attribute, "agility"), 2.0);
        let entity = FakeEntity { values, active: HashMap::new() };

        let group = ConditionNode::Group(vec![
            ConditionItem { connector: Connector::And, node: leaf(ConditionKind::Attribute, "strength", ConditionOperator::Gt, 10.0) },
            ConditionItem { connector: Connector::Or, node: leaf(ConditionKind::Attribute, "agility", ConditionOperator::Gt, 100.0) },
        ]);
        // strength>10 (true) OR agility>100 (false) => true
        assert!(ConditionResolver::new().evaluate(&group, &entity).unwrap());
    }

    #[test]
    fn empty_group_is_an_error() {
        let entity = FakeEntity { values: HashMap::new(), active: HashMap::new() };
        let group = ConditionNode::Group(vec![]);
        assert!(matches!(
            ConditionResolver::new().evaluate(&group, &entity),
            Err(ConditionError::EmptyGroup)
        ));
    }

    #[test]
    fn not_inverts_inner_result() {
        let entity = FakeEntity { values: HashMap::new(), active: HashMap::new() };
        let tree = ConditionNode::Not(Box::new(leaf(ConditionKind::Attribute, "strength", ConditionOperator::Gt, 10.0)));
        assert!(ConditionResolver::new().evaluate(&tree, &entity).unwrap());
    }

    #[test]
    fn membership_operators_test_active_set() {
        let mut active = HashMap::new();
        active.insert((ConditionKind::Trait, "brave"), true);
        let entity = FakeEntity { values: HashMap::new(), active };

        let is_active = leaf(ConditionKind::Trait, "brave", ConditionOperator::Active, 0.0);
        let is_inactive = leaf(ConditionKind::Trait, "coward", ConditionOperator::Inactive, 0.0);
        let resolver = ConditionResolver::new();
        assert!(resolver.evaluate(&is_active, &entity).unwrap());
        assert!(resolver.evaluate(&is_inactive, &entity).unwrap());
    }
}
