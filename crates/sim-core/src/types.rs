//! The data model: nodes, relationships, conditions, and entities.
//!
//! Node kinds are a single tagged sum type with a per-variant payload
//! record (`NodeKind`), not an inheritance hierarchy — each kind carries
//! exactly the fields it needs and nothing else.

use std::collections::HashMap;
use condition_core::ConditionNode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use shared::{EntityId, Timestamp};

// ---------------------------------------------------------------------
// Shared small enums
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeMode {
    Manual,
    Timed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    None,
    Accumulate,
    Deplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollAt {
    Spawn,
    Create,
    Never,
    Manual,
}

/// Layer/trait selection mode. `Threshold` traits are never rolled by the
/// Selection Core; they are driven exclusively by the Threshold Arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    Weighted,
    PickN,
    AllMatching,
    FirstMatch,
    Threshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurationType {
    Permanent,
    Timed,
    Ticks,
    Triggered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackingMode {
    Ignore,
    Refresh,
    Stack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequirementLogic {
    All,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Add,
    Multiply,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scaling {
    Flat,
    PerPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipType {
    WeightInfluence,
    RateModifier,
    ValueModifier,
    EligibilityGate,
    Requires,
    Replaces,
}

// ---------------------------------------------------------------------
// Relationship
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipConfig {
    pub operation: Operation,
    pub value: f64,
    pub scaling: Scaling,
    pub per_point_source: Option<String>,
    pub invert: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    pub rel_type: RelationshipType,
    pub config: RelationshipConfig,
    pub conditions: Vec<ConditionNode>,
}

// ---------------------------------------------------------------------
// Node payloads
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeNode {
    pub min: f64,
    pub max: f64,
    pub default_range: (f64, f64),
    pub precision: u32,
    pub spawn_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableNode {
    pub min: f64,
    pub max: f64,
    pub initial: f64,
    pub base_rate: f64,
    pub change_mode: ChangeMode,
    pub direction: Direction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextNode {
    pub default: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerTiming {
    pub roll_at: RollAt,
    pub reroll_allowed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSelection {
    pub mode: SelectionMode,
    pub max_items: usize,
    pub initial_rolls: usize,
    pub diminishing_returns: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerNode {
    pub order: i32,
    pub selection: LayerSelection,
    pub timing: LayerTiming,
    pub trait_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightModifier {
    pub condition: ConditionNode,
    pub operation: Operation,
    pub value: f64,
}

/// A threshold trait's activation/removal trigger. Shared shape with
/// `ModifierTrigger` below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitTrigger {
    pub conditions: ConditionNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitSelection {
    pub base_weight: f64,
    pub mode: SelectionMode,
    pub weight_modifiers: Vec<WeightModifier>,
    /// Present only for threshold-mode traits.
    pub trigger: Option<TraitTrigger>,
    pub auto_remove: Option<ConditionNode>,
    pub replaces: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitNode {
    pub layer_id: String,
    pub selection: TraitSelection,
    pub incompatible_with: Vec<String>,
    pub eligibility: Vec<ConditionNode>,
    /// Free-form taxonomy tags used by preset `taxonomyFilter` resolution.
    pub taxonomy: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifierTrigger {
    /// `true` if this is a threshold-driven ("static") modifier rather
    /// than a purely duration-driven one.
    pub is_static: bool,
    pub conditions: ConditionNode,
    pub remove_conditions: Option<ConditionNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifierNode {
    pub duration_type: DurationType,
    /// Seconds (timed) or tick count (ticks); unused for permanent/triggered.
    pub duration: f64,
    pub stacking: StackingMode,
    pub max_stacks: u32,
    pub trigger: Option<ModifierTrigger>,
    pub exclusive_with: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CompoundRequirement {
    Id { id: String },
    Threshold {
        id: String,
        operator: condition_core::ConditionOperator,
        value: f64,
    },
    Condition { condition: ConditionNode },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundNode {
    pub requires: Vec<CompoundRequirement>,
    pub requirement_logic: RequirementLogic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedNode {
    pub formula: String,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionNode {
    pub base_weight: f64,
    pub cooldown: f64,
    pub costs: HashMap<String, f64>,
    pub requirements: Vec<ConditionNode>,
    pub blocked_by: Vec<String>,
    pub eligibility: Option<ConditionNode>,
    /// Opaque payload returned to the caller on `executeAction`; the
    /// engine never interprets it.
    pub effects: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeKind {
    Attribute(AttributeNode),
    Variable(VariableNode),
    Context(ContextNode),
    Layer(LayerNode),
    Trait(TraitNode),
    Modifier(ModifierNode),
    Compound(CompoundNode),
    Derived(DerivedNode),
    Action(ActionNode),
}

impl RelationshipType {
    pub fn label(&self) -> &'static str {
        match self {
            RelationshipType::WeightInfluence => "weight_influence",
            RelationshipType::RateModifier => "rate_modifier",
            RelationshipType::ValueModifier => "value_modifier",
            RelationshipType::EligibilityGate => "eligibility_gate",
            RelationshipType::Requires => "requires",
            RelationshipType::Replaces => "replaces",
        }
    }
}

impl NodeKind {
    /// The config-facing discriminator string (`kind` field), including the
    /// `item` backward-compatible synonym normalizing to `trait`.
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Attribute(_) => "attribute",
            NodeKind::Variable(_) => "variable",
            NodeKind::Context(_) => "context",
            NodeKind::Layer(_) => "layer",
            NodeKind::Trait(_) => "trait",
            NodeKind::Modifier(_) => "modifier",
            NodeKind::Compound(_) => "compound",
            NodeKind::Derived(_) => "derived",
            NodeKind::Action(_) => "action",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

// ---------------------------------------------------------------------
// Entity state
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarState {
    pub value: f64,
    pub base_rate: f64,
    pub current_rate: f64,
    pub min: f64,
    pub max: f64,
    pub change_mode: ChangeMode,
    pub direction: Direction,
}

impl VarState {
    pub fn clamp(&mut self) {
        self.value = shared::clamp(self.value, self.min, self.max);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModState {
    pub applied_at: Timestamp,
    pub stacks: u32,
    pub is_static: bool,
    pub expires_at: Option<Timestamp>,
    pub ticks_remaining: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LayerState {
    pub active: Vec<String>,
    pub last_roll: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActionState {
    pub cooldown_remaining: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EntityInternal {
    pub log: Vec<String>,
    pub last_tick: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub config_id: String,
    pub created_at: Timestamp,
    pub preset_id: Option<String>,
    pub attributes: HashMap<String, f64>,
    pub variables: HashMap<String, VarState>,
    pub contexts: HashMap<String, JsonValue>,
    pub layers: HashMap<String, LayerState>,
    pub modifiers: Vec<String>,
    pub modifier_states: HashMap<String, ModState>,
    pub compounds: Vec<String>,
    pub derived: HashMap<String, f64>,
    pub actions: HashMap<String, ActionState>,
    pub pool_id: Option<String>,
    pub internal: EntityInternal,
    /// `batchingCascade`: set while a multi-mutation operation is in
    /// flight; cleared (and the triple run once, if dirty) at batch end.
    #[serde(skip)]
    pub batching_cascade: bool,
    #[serde(skip)]
    pub cascade_dirty: bool,
}

impl Entity {
    pub fn is_modifier_active(&self, id: &str) -> bool {
        self.modifier_states.contains_key(id)
    }

    pub fn is_trait_active(&self, trait_id: &str) -> bool {
        self.layers.values().any(|l| l.active.iter().any(|t| t == trait_id))
    }

    pub fn is_compound_active(&self, id: &str) -> bool {
        self.compounds.iter().any(|c| c == id)
    }
}

/// A point-in-time capture of the fields `snapshot`/`rollback` operate on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: Timestamp,
    pub attributes: HashMap<String, f64>,
    pub variables: HashMap<String, VarState>,
    pub contexts: HashMap<String, JsonValue>,
    pub layers: HashMap<String, LayerState>,
    pub modifiers: Vec<String>,
    pub modifier_states: HashMap<String, ModState>,
    pub compounds: Vec<String>,
    pub derived: HashMap<String, f64>,
}

impl Snapshot {
    pub fn capture(entity: &Entity, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            attributes: entity.attributes.clone(),
            variables: entity.variables.clone(),
            contexts: entity.contexts.clone(),
            layers: entity.layers.clone(),
            modifiers: entity.modifiers.clone(),
            modifier_states: entity.modifier_states.clone(),
            compounds: entity.compounds.clone(),
            derived: entity.derived.clone(),
        }
    }

    pub fn restore_into(&self, entity: &mut Entity) {
        entity.attributes = self.attributes.clone();
        entity.variables = self.variables.clone();
        entity.contexts = self.contexts.clone();
        entity.layers = self.layers.clone();
        entity.modifiers = self.modifiers.clone();
        entity.modifier_states = self.modifier_states.clone();
        entity.compounds = self.compounds.clone();
        entity.derived = self.derived.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_state_clamp_respects_bounds() {
        let mut v = VarState {
            value: 150.0,
            base_rate: 0.0,
            current_rate: 0.0,
            min: 0.0,
            max: 100.0,
            change_mode: ChangeMode::Manual,
            direction: Direction::None,
        };
        v.clamp();
        assert_eq!(v.value, 100.0);
    }

    #[test]
    fn entity_membership_helpers() {
        let mut entity = blank_entity();
        entity.layers.insert(
            "mood".to_string(),
            LayerState { active: vec!["grumpy".to_string()], last_roll: None },
        );
        entity.modifier_states.insert(
            "mod_x".to_string(),
            ModState { applied_at: chrono::Utc::now(), stacks: 1, is_static: false, expires_at: None, ticks_remaining: None },
        );
        entity.compounds.push("hangry".to_string());

        assert!(entity.is_trait_active("grumpy"));
        assert!(!entity.is_trait_active("cheerful"));
        assert!(entity.is_modifier_active("mod_x"));
        assert!(entity.is_compound_active("hangry"));
    }

    fn blank_entity() -> Entity {
        Entity {
            id: uuid::Uuid::new_v4(),
            config_id: "cfg".to_string(),
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
            internal: EntityInternal::default(),
            batching_cascade: false,
            cascade_dirty: false,
        }
    }
}
