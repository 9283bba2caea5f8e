//! Runtime Tick Loop: variable integration, modifier expiry, action
//! cooldown decay, re-derivation. The Threshold Arbiter lives in
//! [`threshold`].

pub mod threshold;

use condition_core::ConditionResolver;

use crate::cascade;
use crate::condition::EntityView;
use crate::config::ConfigIndex;
use crate::events::{Event, EventBus, EventKind};
use crate::types::{ChangeMode, Direction, Entity, NodeKind};

/// Advance `entity` by `delta_seconds`: integrate timed/non-`none`
/// variables, expire modifiers, run the threshold arbiter, decay action
/// cooldowns, and re-run `calculateDerived`.
pub fn tick(entity: &mut Entity, config: &ConfigIndex, delta_seconds: f64, events: &EventBus) {
    integrate_variables(entity, config, delta_seconds, events);
    expire_modifiers(entity, config, events);
    threshold::check_modifier_thresholds(entity, config, events);
    decay_action_cooldowns(entity, delta_seconds);
    cascade::run(entity, config, events);
}

fn integrate_variables(entity: &mut Entity, config: &ConfigIndex, delta_seconds: f64, events: &EventBus) {
    let var_ids: Vec<String> = entity.variables.keys().cloned().collect();
    for var_id in var_ids {
        let Some(state) = entity.variables.get_mut(&var_id) else { continue };
        if state.change_mode != ChangeMode::Timed || state.direction == Direction::None {
            continue;
        }
        let previous = state.value;
        state.value += state.current_rate * delta_seconds;
        state.clamp();
        if (state.value - previous).abs() > f64::EPSILON {
            events.emit(Event::new(
                EventKind::VariableChanged,
                Some(entity.id),
                serde_json::json!({ "variableId": var_id, "value": state.value }),
            ));
            threshold::check_thresholds(entity, config, &var_id, events);
        }
    }
}

fn expire_modifiers(entity: &mut Entity, config: &ConfigIndex, events: &EventBus) {
    let now = chrono::Utc::now();
    let mut expired = Vec::new();

    for (mod_id, state) in entity.modifier_states.iter_mut() {
        if let Some(expires_at) = state.expires_at {
            if expires_at <= now {
                expired.push(mod_id.clone());
                continue;
            }
        }
        if let Some(remaining) = state.ticks_remaining {
            let remaining = remaining - 1;
            state.ticks_remaining = Some(remaining);
            if remaining <= 0 {
                expired.push(mod_id.clone());
            }
        }
    }

    for mod_id in expired {
        crate::modifiers::remove_modifier(entity, config, &mod_id, events);
    }
}

fn decay_action_cooldowns(entity: &mut Entity, delta_seconds: f64) {
    for state in entity.actions.values_mut() {
        state.cooldown_remaining = (state.cooldown_remaining - delta_seconds).max(0.0);
    }
}

/// `eligibility`/`requirements` gate check shared by action execution and
/// the public `canExecuteAction` query.
pub fn action_is_ready(entity: &Entity, config: &ConfigIndex, action_id: &str) -> bool {
    let Some(NodeKind::Action(node)) = config.get(action_id).map(|n| &n.kind) else { return false };
    let cooldown_ready = entity.actions.get(action_id).map(|s| s.cooldown_remaining <= 0.0).unwrap_or(true);
    if !cooldown_ready {
        return false;
    }
    if node.blocked_by.iter().any(|blocker| entity.is_trait_active(blocker) || entity.is_modifier_active(blocker)) {
        return false;
    }
    let resolver = ConditionResolver::new();
    let view = EntityView::new(entity);
    if let Some(eligibility) = &node.eligibility {
        if !resolver.evaluate(eligibility, &view).unwrap_or(false) {
            return false;
        }
    }
    node.requirements.iter().all(|c| resolver.evaluate(c, &view).unwrap_or(false))
}
