//! Targeted spot-checks for the testable-properties invariants not
//! already exercised end-to-end by `scenarios.rs`.

use std::collections::HashMap;

use sim_core::rng::SeededRng;
use sim_core::{Engine, SpawnOverrides};

const MOOD_CONFIG: &str = r#"{
    "nodes": [
        {"id": "mood", "kind": "layer", "order": 0, "selection": {"mode": "Weighted", "max_items": 10, "initial_rolls": 0, "diminishing_returns": false}, "timing": {"roll_at": "Never", "reroll_allowed": false}, "trait_ids": ["happy", "sad"]},
        {"id": "happy", "kind": "trait", "layer_id": "mood", "selection": {"base_weight": 10, "mode": "Weighted", "weight_modifiers": [], "trigger": null, "auto_remove": null, "replaces": []}, "incompatible_with": ["sad"], "eligibility": [], "taxonomy": {}},
        {"id": "sad", "kind": "trait", "layer_id": "mood", "selection": {"base_weight": 30, "mode": "Weighted", "weight_modifiers": [], "trigger": null, "auto_remove": null, "replaces": []}, "incompatible_with": ["happy"], "eligibility": [], "taxonomy": {}}
    ]
}"#;

/// Invariant 3: a trait's `incompatibleWith` set can never overlap the
/// active set — rolling a layer never returns a trait incompatible with
/// one already active in it.
#[tokio::test]
async fn incompatible_traits_never_coexist_in_a_layer() {
    let engine = Engine::new();
    engine.load_config(MOOD_CONFIG).await.unwrap();
    let id = engine.generate(SpawnOverrides::default()).await.unwrap();

    engine.activate_trait(id, "happy").await.unwrap();
    let outcome = engine.roll_layer(id, "mood").await.unwrap();

    // "sad" is excluded by incompatibility and "happy" by already being
    // active, so the eligible pool for "mood" is empty.
    match outcome {
        sim_core::selection::SelectionOutcome::NoEligibleTraits => {}
        sim_core::selection::SelectionOutcome::Selected(ids) => {
            panic!("expected no eligible traits once an incompatible one is active, got {ids:?}")
        }
    }

    let state = engine.get_state(id).await.unwrap();
    assert!(state.is_trait_active("happy"));
    assert!(!state.is_trait_active("sad"));
}

/// Invariant 4: `|layer.active| <= layer.selection.maxItems`, enforced
/// across both pickN and allMatching selection.
#[tokio::test]
async fn layer_active_count_never_exceeds_max_items() {
    let engine = Engine::new();
    let config = r#"{
        "nodes": [
            {"id": "traits_layer", "kind": "layer", "order": 0, "selection": {"mode": "PickN", "max_items": 1, "initial_rolls": 5, "diminishing_returns": false}, "timing": {"roll_at": "Never", "reroll_allowed": false}, "trait_ids": ["a", "b", "c"]},
            {"id": "a", "kind": "trait", "layer_id": "traits_layer", "selection": {"base_weight": 10, "mode": "PickN", "weight_modifiers": [], "trigger": null, "auto_remove": null, "replaces": []}, "incompatible_with": [], "eligibility": [], "taxonomy": {}},
            {"id": "b", "kind": "trait", "layer_id": "traits_layer", "selection": {"base_weight": 10, "mode": "PickN", "weight_modifiers": [], "trigger": null, "auto_remove": null, "replaces": []}, "incompatible_with": [], "eligibility": [], "taxonomy": {}},
            {"id": "c", "kind": "trait", "layer_id": "traits_layer", "selection": {"base_weight": 10, "mode": "PickN", "weight_modifiers": [], "trigger": null, "auto_remove": null, "replaces": []}, "incompatible_with": [], "eligibility": [], "taxonomy": {}}
        ]
    }"#;
    engine.load_config(config).await.unwrap();
    let id = engine.generate(SpawnOverrides::default()).await.unwrap();

    // initial_rolls (5) exceeds maxItems (1); only one trait may land.
    engine.roll_layer(id, "traits_layer").await.unwrap();
    let state = engine.get_state(id).await.unwrap();
    assert_eq!(state.layers["traits_layer"].active.len(), 1);

    // Rolling again with the layer already full must add nothing further.
    let outcome = engine.roll_layer(id, "traits_layer").await.unwrap();
    assert!(matches!(outcome, sim_core::selection::SelectionOutcome::NoEligibleTraits));
    let state = engine.get_state(id).await.unwrap();
    assert_eq!(state.layers["traits_layer"].active.len(), 1);
}

/// Invariant 9: over many trials from a fixed pool, empirical selection
/// frequencies converge to `weight_i / Σweights`.
#[tokio::test]
async fn weighted_selection_converges_to_relative_weight() {
    const TRIALS: usize = 4000;
    let mut counts: HashMap<String, usize> = HashMap::new();

    for trial in 0..TRIALS {
        let engine = Engine::new().with_rng(Box::new(SeededRng::new(trial as u64))).await;
        engine.load_config(MOOD_CONFIG).await.unwrap();
        let id = engine.generate(SpawnOverrides::default()).await.unwrap();

        if let sim_core::selection::SelectionOutcome::Selected(ids) = engine.roll_layer(id, "mood").await.unwrap() {
            for trait_id in ids {
                *counts.entry(trait_id).or_insert(0) += 1;
            }
        }
    }

    // weights are happy=10, sad=30 out of a total of 40.
    let happy_freq = *counts.get("happy").unwrap_or(&0) as f64 / TRIALS as f64;
    let sad_freq = *counts.get("sad").unwrap_or(&0) as f64 / TRIALS as f64;

    assert!((happy_freq - 0.25).abs() < 0.05, "happy frequency {happy_freq} should be near 0.25");
    assert!((sad_freq - 0.75).abs() < 0.05, "sad frequency {sad_freq} should be near 0.75");
}

/// Invariant 6: applying then removing a modifier with no intervening
/// mutations restores every affected variable's `currentRate`.
#[tokio::test]
async fn apply_then_remove_modifier_restores_rate() {
    let engine = Engine::new();
    let config = r#"{
        "nodes": [
            {"id": "stamina", "kind": "variable", "min": 0, "max": 100, "initial": 50, "base_rate": 1, "change_mode": "Manual", "direction": "None"},
            {"id": "haste", "kind": "modifier", "duration_type": "Permanent", "duration": 0, "stacking": "Ignore", "max_stacks": 1, "trigger": null, "exclusive_with": []}
        ],
        "relationships": [
            {"source_id": "haste", "target_id": "stamina", "rel_type": "RateModifier", "config": {"operation": "Add", "value": 7, "scaling": "Flat", "per_point_source": null, "invert": false}, "conditions": []}
        ]
    }"#;
    engine.load_config(config).await.unwrap();
    let id = engine.generate(SpawnOverrides::default()).await.unwrap();

    let before = engine.get_state(id).await.unwrap().variables["stamina"].current_rate;
    assert_eq!(before, 1.0);

    engine.apply_modifier(id, "haste").await.unwrap();
    let during = engine.get_state(id).await.unwrap().variables["stamina"].current_rate;
    assert_eq!(during, 8.0);

    engine.remove_modifier(id, "haste").await.unwrap();
    let after = engine.get_state(id).await.unwrap().variables["stamina"].current_rate;
    assert_eq!(after, before);
}

/// Invariant 8: running the cascade twice in a row from the same state
/// yields identical state (idempotence).
#[tokio::test]
async fn cascade_is_idempotent() {
    let engine = Engine::new();
    let config = r#"{
        "nodes": [
            {"id": "stamina", "kind": "variable", "min": 0, "max": 100, "initial": 50, "base_rate": 1, "change_mode": "Manual", "direction": "None"},
            {"id": "haste", "kind": "modifier", "duration_type": "Permanent", "duration": 0, "stacking": "Ignore", "max_stacks": 1, "trigger": null, "exclusive_with": []}
        ],
        "relationships": [
            {"source_id": "haste", "target_id": "stamina", "rel_type": "RateModifier", "config": {"operation": "Add", "value": 7, "scaling": "Flat", "per_point_source": null, "invert": false}, "conditions": []}
        ]
    }"#;
    engine.load_config(config).await.unwrap();
    let id = engine.generate(SpawnOverrides::default()).await.unwrap();
    engine.apply_modifier(id, "haste").await.unwrap();

    let first = engine.get_state(id).await.unwrap();
    engine.tick(id, 0.0).await.unwrap();
    let second = engine.get_state(id).await.unwrap();

    assert_eq!(first.variables["stamina"].current_rate, second.variables["stamina"].current_rate);
    assert_eq!(first.modifiers, second.modifiers);
}

/// Invariant 10: an attribute's generation range respects `valueModifier`
/// relationships from traits whose layer's `order` precedes the
/// attribute's own `spawnOrder`.
#[tokio::test]
async fn spawn_order_respects_earlier_layer_value_modifiers() {
    let engine = Engine::new();
    let config = r#"{
        "nodes": [
            {"id": "mood", "kind": "layer", "order": 0, "selection": {"mode": "AllMatching", "max_items": 10, "initial_rolls": 1, "diminishing_returns": false}, "timing": {"roll_at": "Spawn", "reroll_allowed": false}, "trait_ids": ["brave"]},
            {"id": "brave", "kind": "trait", "layer_id": "mood", "selection": {"base_weight": 10, "mode": "Weighted", "weight_modifiers": [], "trigger": null, "auto_remove": null, "replaces": []}, "incompatible_with": [], "eligibility": [], "taxonomy": {}},
            {"id": "strength", "kind": "attribute", "min": 0, "max": 100, "default_range": [10, 10], "precision": 0, "spawn_order": 1}
        ],
        "relationships": [
            {"source_id": "brave", "target_id": "strength", "rel_type": "ValueModifier", "config": {"operation": "Add", "value": 5, "scaling": "Flat", "per_point_source": null, "invert": false}, "conditions": []}
        ]
    }"#;
    engine.load_config(config).await.unwrap();
    let id = engine.generate(SpawnOverrides::default()).await.unwrap();

    let state = engine.get_state(id).await.unwrap();
    assert!(state.is_trait_active("brave"), "mood rolls at order 0, before strength's spawnOrder of 1");
    assert_eq!(state.attributes["strength"], 15.0, "strength's generation range must include brave's +5 valueModifier");
}
