//! Core types for the condition resolver: the leaf condition shape, the
//! composite tree shape, and the trait an evaluation target must
//! implement to be tested against.

use serde::{Deserialize, Serialize};

/// The kind of node a condition's `target` field refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Attribute,
    Variable,
    Context,
    Trait,
    Modifier,
    Compound,
}

/// Comparison/membership operator for a single condition leaf.
///
/// Deserializes from the literal symbols used in config documents
/// (`"<"`, `"<="`, ...) rather than the Rust variant names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    /// Target (a trait/modifier/compound id) is currently active/present.
    #[serde(rename = "active")]
    Active,
    /// Target is currently inactive/absent.
    #[serde(rename = "inactive")]
    Inactive,
}

impl ConditionOperator {
    /// `true` for operators that bypass value lookup and test membership
    /// through [`ConditionTarget::is_active`] instead.
    pub fn is_membership(self) -> bool {
        matches!(self, ConditionOperator::Active | ConditionOperator::Inactive)
    }

    /// Apply a numeric comparison operator. Callers must branch on
    /// [`is_membership`] first; this is never called with `Active`/`Inactive`.
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            ConditionOperator::Lt => lhs < rhs,
            ConditionOperator::Lte => lhs <= rhs,
            ConditionOperator::Gt => lhs > rhs,
            ConditionOperator::Gte => lhs >= rhs,
            ConditionOperator::Eq => (lhs - rhs).abs() < f64::EPSILON,
            ConditionOperator::Ne => (lhs - rhs).abs() >= f64::EPSILON,
            ConditionOperator::Active | ConditionOperator::Inactive => unreachable!(
                "membership operators are resolved via is_active, not apply"
            ),
        }
    }
}

/// A single condition leaf: `{type, target, operator, value}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    pub target: String,
    pub operator: ConditionOperator,
    /// Comparison operand; unused for `Active`/`Inactive`.
    pub value: f64,
}

impl Condition {
    pub fn new(kind: ConditionKind, target: impl Into<String>, operator: ConditionOperator, value: f64) -> Self {
        Self {
            kind,
            target: target.into(),
            operator,
            value,
        }
    }
}

/// Logical connector joining one list item to the fold accumulated so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connector {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

/// One entry in an ordered condition list: its connector to the running
/// fold, and the sub-tree it evaluates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionItem {
    pub connector: Connector,
    pub node: ConditionNode,
}

/// A condition tree. Config normalization (owned by the engine's config
/// store, not this crate) resolves the three raw config shapes a
/// document may use — an explicit `all`/`any`/`not` tree, an ordered
/// list with per-leaf connectors, and the legacy `logic='all'|'any'`
/// shorthand — down to these variants, filling in the top-level-AND/
/// nested-group-OR default connectors along the way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConditionNode {
    Leaf(Condition),
    All(Vec<ConditionNode>),
    Any(Vec<ConditionNode>),
    Not(Box<ConditionNode>),
    /// An ordered list folded left-to-right via each item's connector.
    /// Also represents a nested `{type:'group', conditions:[...]}` node,
    /// which participates in the outer fold as a single leaf.
    Group(Vec<ConditionItem>),
}

/// Anything a [`ConditionNode`] can be evaluated against.
pub trait ConditionTarget {
    /// Fetch the current numeric value of `target` under `kind`, or `None`
    /// if the node is absent or not numeric (context values that aren't
    /// numeric resolve to `None`, which makes any comparison against them
    /// evaluate to `false`).
    fn node_value(&self, kind: ConditionKind, target: &str) -> Option<f64>;

    /// Test whether `target` is currently active/present for `kind`
    /// (trait in its layer's active list, modifier in the modifier set,
    /// compound in the compound set).
    fn is_active(&self, kind: ConditionKind, target: &str) -> bool;
}
