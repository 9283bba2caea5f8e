//! Config Store: validates, normalizes, and indexes a configuration
//! document.
//!
//! Indexes are built eagerly once at `load` time and shared read-only
//! across every entity generated from that config: config-immutable,
//! safe to share without locking.

use std::collections::{HashMap, HashSet};

use condition_core::{ConditionKind, ConditionNode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::formula::CompiledFormula;
use crate::types::{Node, NodeKind, Relationship};

fn default_weight_one() -> f64 {
    1.0
}

/// A preset's per-attribute override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeSpec {
    Fixed(f64),
    Range { min: f64, max: f64 },
    Variance { base: f64, variance: f64 },
    Value { value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresetTraitMode {
    Weighted,
    Chance,
    PickN,
    All,
    TaxonomyFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PoolEntry {
    Id(String),
    Weighted {
        id: String,
        #[serde(default = "default_weight_one")]
        weight: f64,
    },
}

impl PoolEntry {
    pub fn id(&self) -> &str {
        match self {
            PoolEntry::Id(id) => id,
            PoolEntry::Weighted { id, .. } => id,
        }
    }

    pub fn weight(&self) -> f64 {
        match self {
            PoolEntry::Id(_) => 1.0,
            PoolEntry::Weighted { weight, .. } => *weight,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetTraitModeSpec {
    pub mode: PresetTraitMode,
    #[serde(default)]
    pub pool: Vec<PoolEntry>,
    #[serde(default)]
    pub chance: Option<f64>,
    #[serde(default)]
    pub n: Option<usize>,
    #[serde(default)]
    pub taxonomy: HashMap<String, String>,
}

/// A preset's `traits` field maps `layerId` to a trait-resolution mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PresetTraitSpec {
    Single(String),
    Multiple(Vec<String>),
    Mode(PresetTraitModeSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Preset {
    #[serde(default)]
    pub attributes: HashMap<String, AttributeSpec>,
    #[serde(default)]
    pub traits: HashMap<String, PresetTraitSpec>,
    #[serde(default)]
    pub contexts: HashMap<String, JsonValue>,
}

/// The raw shape a config document is deserialized from. Field-level
/// `#[serde(default = ...)]` covers the normalization rules that are pure
/// value defaults (`selection.baseWeight=20`, `initial=100`, …); the
/// handful of legacy *shape* conversions (single `trigger.target`,
/// `trigger.autoRemove`, `durationType='manual'`, scalar `exclusiveWith`)
/// are resolved by [`ConfigStore::load`] walking the raw JSON before
/// typed deserialization, since those change the shape serde defaults
/// alone cannot express.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigDocument {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub presets: HashMap<String, Preset>,
    #[serde(default = "crate::config::default_tick_rate_ms")]
    pub tick_rate_ms: u64,
}

pub(crate) fn default_tick_rate_ms() -> u64 {
    shared::constants::DEFAULT_TICK_RATE_MS
}

/// Eagerly-built indexes over a loaded config, shared read-only across
/// every entity spawned from it.
#[derive(Debug)]
pub struct ConfigIndex {
    pub node_index: HashMap<String, Node>,
    /// `kind label -> node ids`, with a synthetic `_traits` bucket.
    pub nodes_by_kind: HashMap<String, Vec<String>>,
    pub rel_by_source: HashMap<String, Vec<Relationship>>,
    pub rel_by_target: HashMap<String, Vec<Relationship>>,
    pub rel_by_type: HashMap<&'static str, Vec<Relationship>>,
    /// Modifier ids whose trigger is static (threshold-driven).
    pub threshold_modifiers: Vec<String>,
    /// `variableId -> [threshold trait id]`.
    pub threshold_traits_by_var: HashMap<String, Vec<String>>,
    /// Symmetric adjacency of `exclusiveWith`; transitive closure into
    /// equivalence classes is computed on demand by the threshold arbiter.
    pub exclusive_groups: HashMap<String, HashSet<String>>,
    pub formula_cache: HashMap<String, CompiledFormula>,
    pub presets: HashMap<String, Preset>,
    pub tick_rate_ms: u64,
}

impl ConfigIndex {
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id)
    }

    pub fn traits(&self) -> impl Iterator<Item = &Node> {
        self.nodes_by_kind
            .get("_traits")
            .into_iter()
            .flatten()
            .filter_map(move |id| self.node_index.get(id))
    }

    pub fn relationships_targeting(&self, target_id: &str) -> &[Relationship] {
        self.rel_by_target.get(target_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn relationships_from(&self, source_id: &str) -> &[Relationship] {
        self.rel_by_source.get(source_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub struct ConfigStore;

impl ConfigStore {
    /// Parse, normalize, validate, and index a JSON config document.
    pub fn load_json(raw: &str) -> EngineResult<ConfigIndex> {
        let mut value: JsonValue = serde_json::from_str(raw)?;
        Self::normalize_legacy_shapes(&mut value);
        let doc: ConfigDocument = serde_json::from_value(value)?;
        Self::build(doc)
    }

    /// Parse, normalize, validate, and index a YAML config document.
    pub fn load_yaml(raw: &str) -> EngineResult<ConfigIndex> {
        let mut value: JsonValue = serde_yaml::from_str(raw)?;
        Self::normalize_legacy_shapes(&mut value);
        let doc: ConfigDocument = serde_json::from_value(value)?;
        Self::build(doc)
    }

    /// Normalize legacy config shapes in place, before typed
    /// deserialization: single `trigger.target` → `trigger.conditions`,
    /// `trigger.autoRemove` → `removeConditions` with `static=true`,
    /// `durationType='manual'` → `'permanent'`, scalar `exclusiveWith` →
    /// a single-element list.
    fn normalize_legacy_shapes(doc: &mut JsonValue) {
        let Some(nodes) = doc.get_mut("nodes").and_then(|n| n.as_array_mut()) else {
            return;
        };
        for node in nodes {
            if node.get("kind").and_then(|k| k.as_str()) != Some("modifier") {
                continue;
            }
            if let Some(duration_type) = node.pointer_mut("/duration_type") {
                if duration_type.as_str() == Some("manual") {
                    *duration_type = JsonValue::String("Permanent".to_string());
                }
            }
            if let Some(exclusive) = node.pointer_mut("/exclusive_with") {
                if !exclusive.is_array() {
                    let single = exclusive.clone();
                    *exclusive = JsonValue::Array(vec![single]);
                }
            }
            if let Some(trigger) = node.pointer_mut("/trigger").filter(|t| t.is_object()) {
                if let Some(target) = trigger.get("target").cloned() {
                    if trigger.get("conditions").is_none() {
                        let operator = trigger.get("operator").cloned().unwrap_or(JsonValue::String("==".into()));
                        let value = trigger.get("value").cloned().unwrap_or(JsonValue::from(0.0));
                        let leaf = serde_json::json!({
                            "Leaf": {
                                "type": "variable",
                                "target": target,
                                "operator": operator,
                                "value": value,
                            }
                        });
                        trigger["conditions"] = leaf;
                        trigger["is_static"] = JsonValue::Bool(true);
                    }
                }
                if let Some(auto_remove) = trigger.get("autoRemove").cloned() {
                    if trigger.get("remove_conditions").is_none() {
                        trigger["remove_conditions"] = auto_remove;
                        trigger["is_static"] = JsonValue::Bool(true);
                    }
                }
            }
        }
    }

    fn build(doc: ConfigDocument) -> EngineResult<ConfigIndex> {
        let mut node_index = HashMap::new();
        for node in &doc.nodes {
            if node_index.insert(node.id.clone(), node.clone()).is_some() {
                return Err(EngineError::Config(format!("duplicate node id '{}'", node.id)));
            }
        }

        for rel in &doc.relationships {
            if !node_index.contains_key(&rel.source_id) {
                return Err(EngineError::Config(format!(
                    "relationship references unknown sourceId '{}'",
                    rel.source_id
                )));
            }
            if !node_index.contains_key(&rel.target_id) {
                return Err(EngineError::Config(format!(
                    "relationship references unknown targetId '{}'",
                    rel.target_id
                )));
            }
        }

        let mut nodes_by_kind: HashMap<String, Vec<String>> = HashMap::new();
        for node in &doc.nodes {
            nodes_by_kind.entry(node.kind.label().to_string()).or_default().push(node.id.clone());
            if matches!(node.kind, NodeKind::Trait(_)) {
                nodes_by_kind.entry("_traits".to_string()).or_default().push(node.id.clone());
            }
        }

        let mut rel_by_source: HashMap<String, Vec<Relationship>> = HashMap::new();
        let mut rel_by_target: HashMap<String, Vec<Relationship>> = HashMap::new();
        let mut rel_by_type: HashMap<&'static str, Vec<Relationship>> = HashMap::new();
        for rel in &doc.relationships {
            rel_by_source.entry(rel.source_id.clone()).or_default().push(rel.clone());
            rel_by_target.entry(rel.target_id.clone()).or_default().push(rel.clone());
            rel_by_type.entry(rel.rel_type.label()).or_default().push(rel.clone());
        }

        let mut threshold_modifiers = Vec::new();
        let mut exclusive_groups: HashMap<String, HashSet<String>> = HashMap::new();
        for node in &doc.nodes {
            if let NodeKind::Modifier(m) = &node.kind {
                if m.trigger.as_ref().is_some_and(|t| t.is_static) {
                    threshold_modifiers.push(node.id.clone());
                }
                for other in &m.exclusive_with {
                    exclusive_groups.entry(node.id.clone()).or_default().insert(other.clone());
                    exclusive_groups.entry(other.clone()).or_default().insert(node.id.clone());
                }
            }
        }

        let mut threshold_traits_by_var: HashMap<String, Vec<String>> = HashMap::new();
        for node in &doc.nodes {
            if let NodeKind::Trait(t) = &node.kind {
                if t.selection.mode == crate::types::SelectionMode::Threshold {
                    if let Some(trigger) = &t.selection.trigger {
                        for var_id in condition_target_ids(&trigger.conditions, ConditionKind::Variable) {
                            threshold_traits_by_var.entry(var_id).or_default().push(node.id.clone());
                        }
                    }
                }
            }
        }

        let mut formula_cache = HashMap::new();
        for node in &doc.nodes {
            if let NodeKind::Derived(d) = &node.kind {
                match CompiledFormula::compile(&d.formula) {
                    Ok(compiled) => {
                        formula_cache.insert(d.formula.clone(), compiled);
                    }
                    Err(e) => {
                        return Err(EngineError::Config(format!(
                            "derived node '{}' has an unparsable formula '{}': {e}",
                            node.id, d.formula
                        )));
                    }
                }
            }
        }

        report_cyclic_replaces(&node_index);

        Ok(ConfigIndex {
            node_index,
            nodes_by_kind,
            rel_by_source,
            rel_by_target,
            rel_by_type,
            threshold_modifiers,
            threshold_traits_by_var,
            exclusive_groups,
            formula_cache,
            presets: doc.presets,
            tick_rate_ms: doc.tick_rate_ms,
        })
    }
}

/// Collect every leaf `target` id of `kind` referenced anywhere in a
/// condition tree (used to bucket threshold traits by the variable their
/// trigger reads).
fn condition_target_ids(node: &ConditionNode, kind: ConditionKind) -> Vec<String> {
    let mut out = Vec::new();
    collect_condition_target_ids(node, kind, &mut out);
    out
}

fn collect_condition_target_ids(node: &ConditionNode, kind: ConditionKind, out: &mut Vec<String>) {
    match node {
        ConditionNode::Leaf(c) => {
            if c.kind == kind {
                out.push(c.target.clone());
            }
        }
        ConditionNode::All(nodes) | ConditionNode::Any(nodes) => {
            for n in nodes {
                collect_condition_target_ids(n, kind, out);
            }
        }
        ConditionNode::Not(inner) => collect_condition_target_ids(inner, kind, out),
        ConditionNode::Group(items) => {
            for item in items {
                collect_condition_target_ids(&item.node, kind, out);
            }
        }
    }
}

/// `replaces` chains forming a cycle are reported, not fatal.
fn report_cyclic_replaces(node_index: &HashMap<String, Node>) {
    for (id, node) in node_index {
        if let NodeKind::Trait(t) = &node.kind {
            let mut seen = HashSet::new();
            let mut current = id.clone();
            seen.insert(current.clone());
            loop {
                let Some(Node { kind: NodeKind::Trait(next), .. }) = node_index.get(&current) else { break };
                let Some(first) = next.selection.replaces.first() else { break };
                if !seen.insert(first.clone()) {
                    warn!("cyclic 'replaces' chain detected starting at trait '{}'", id);
                    break;
                }
                current = first.clone();
            }
            let _ = t;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_doc() -> &'static str {
        r#"{
            "nodes": [
                {"id": "hunger", "kind": "variable", "min": 0, "max": 100, "initial": 60, "base_rate": -10, "change_mode": "Timed", "direction": "Deplete"},
                {"id": "grumpy", "kind": "trait", "layer_id": "mood", "selection": {"base_weight": 20, "mode": "Threshold", "weight_modifiers": [], "trigger": {"conditions": {"Leaf": {"type": "variable", "target": "hunger", "operator": "<=", "value": 20}}}, "auto_remove": null, "replaces": []}, "incompatible_with": [], "eligibility": [], "taxonomy": {}}
            ]
        }"#
    }

    #[test]
    fn loads_and_indexes_minimal_config() {
        let index = ConfigStore::load_json(minimal_doc()).unwrap();
        assert!(index.node_index.contains_key("hunger"));
        assert_eq!(index.threshold_traits_by_var.get("hunger").map(Vec::len), Some(1));
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let doc = r#"{"nodes": [
            {"id": "a", "kind": "context", "default": null},
            {"id": "a", "kind": "context", "default": null}
        ]}"#;
        assert!(ConfigStore::load_json(doc).is_err());
    }

    #[test]
    fn legacy_manual_duration_normalizes_to_permanent() {
        let doc = r#"{"nodes": [
            {"id": "buff", "kind": "modifier", "duration_type": "manual", "duration": 0, "stacking": "Ignore", "max_stacks": 1, "trigger": null, "exclusive_with": []}
        ]}"#;
        let index = ConfigStore::load_json(doc).unwrap();
        let Some(Node { kind: NodeKind::Modifier(m), .. }) = index.get("buff") else { panic!("missing node") };
        assert!(matches!(m.duration_type, crate::types::DurationType::Permanent));
    }
}
