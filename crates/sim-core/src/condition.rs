//! Adapter wiring [`condition_core`] to entity state.
//!
//! Node-value lookup has two distinct call shapes in practice, kept here
//! under distinct names rather than unified into one:
//!
//! - [`EntityView`] implements [`ConditionTarget`] via *type-dispatched*
//!   lookup (attribute / `variable.value` / context) — used wherever the
//!   caller already knows the condition's `type` field, i.e. every
//!   relationship/condition evaluation in selection and cascade.
//! - [`get_node_value_by_id`] is the *fallback* lookup (attribute, else
//!   variable value, else derived) used by the runtime side where only a
//!   bare node id is available (threshold display, `previewInfluences`).

use condition_core::{ConditionKind, ConditionTarget};

use crate::types::Entity;

/// Coerce an opaque context value to a number for use in numeric
/// comparisons. Non-numeric contexts (strings, objects, missing ids)
/// resolve to `None`, which the resolver treats as a vacuous `false`.
fn context_as_number(value: &serde_json::Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_bool().map(|b| if b { 1.0 } else { 0.0 }))
}

/// A read-only view over one entity's state for condition evaluation.
pub struct EntityView<'a> {
    pub entity: &'a Entity,
}

impl<'a> EntityView<'a> {
    pub fn new(entity: &'a Entity) -> Self {
        Self { entity }
    }
}

impl<'a> ConditionTarget for EntityView<'a> {
    fn node_value(&self, kind: ConditionKind, target: &str) -> Option<f64> {
        match kind {
            ConditionKind::Attribute => self.entity.attributes.get(target).copied(),
            ConditionKind::Variable => self.entity.variables.get(target).map(|v| v.value),
            ConditionKind::Context => self.entity.contexts.get(target).and_then(context_as_number),
            ConditionKind::Trait | ConditionKind::Modifier | ConditionKind::Compound => None,
        }
    }

    fn is_active(&self, kind: ConditionKind, target: &str) -> bool {
        match kind {
            ConditionKind::Trait => self.entity.is_trait_active(target),
            ConditionKind::Modifier => self.entity.is_modifier_active(target),
            ConditionKind::Compound => self.entity.is_compound_active(target),
            ConditionKind::Attribute | ConditionKind::Variable | ConditionKind::Context => false,
        }
    }
}

/// The fallback, kind-agnostic node value lookup: attribute, else
/// variable value, else derived; `None` if the id is absent from all
/// three.
pub fn get_node_value_by_id(entity: &Entity, id: &str) -> Option<f64> {
    entity
        .attributes
        .get(id)
        .copied()
        .or_else(|| entity.variables.get(id).map(|v| v.value))
        .or_else(|| entity.derived.get(id).copied())
}
