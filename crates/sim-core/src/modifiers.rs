//! Apply/remove modifier semantics: stacking modes, `ModState`
//! construction, static vs. timed/ticks expiry.

use chrono::Utc;

use crate::cascade;
use crate::config::ConfigIndex;
use crate::events::{Event, EventBus, EventKind};
use crate::types::{DurationType, Entity, ModState, NodeKind, StackingMode};

fn default_max_stacks(configured: u32) -> u32 {
    if configured == 0 { 99 } else { configured }
}

/// Apply a modifier, honoring `stacking`. `is_static` marks a
/// threshold-driven (arbiter-managed) application, which never carries
/// `expiresAt` regardless of `durationType`.
pub fn apply_modifier(entity: &mut Entity, config: &ConfigIndex, mod_id: &str, is_static: bool, events: &EventBus) {
    let Some(NodeKind::Modifier(node)) = config.get(mod_id).map(|n| &n.kind) else { return };
    let now = Utc::now();

    if let Some(state) = entity.modifier_states.get_mut(mod_id) {
        match node.stacking {
            StackingMode::Refresh => {
                state.applied_at = now;
                if node.duration_type == DurationType::Timed && !state.is_static {
                    state.expires_at = Some(now + chrono::Duration::milliseconds((node.duration * 1000.0) as i64));
                }
            }
            StackingMode::Stack => {
                let max_stacks = default_max_stacks(node.max_stacks);
                state.stacks = (state.stacks + 1).min(max_stacks);
            }
            StackingMode::Ignore => {}
        }
        cascade::run_batched(entity, config, events);
        return;
    }

    let expires_at = if node.duration_type == DurationType::Timed && !is_static {
        Some(now + chrono::Duration::milliseconds((node.duration * 1000.0) as i64))
    } else {
        None
    };
    let ticks_remaining = if node.duration_type == DurationType::Ticks {
        Some(node.duration as i64)
    } else {
        None
    };

    entity.modifiers.push(mod_id.to_string());
    entity.modifier_states.insert(
        mod_id.to_string(),
        ModState { applied_at: now, stacks: 1, is_static, expires_at, ticks_remaining },
    );

    events.emit(Event::new(EventKind::ModifierApplied, Some(entity.id), serde_json::json!({ "modifierId": mod_id })));
    cascade::run_batched(entity, config, events);
}

pub fn remove_modifier(entity: &mut Entity, config: &ConfigIndex, mod_id: &str, events: &EventBus) {
    if entity.modifier_states.remove(mod_id).is_none() {
        return;
    }
    entity.modifiers.retain(|m| m != mod_id);
    events.emit(Event::new(EventKind::ModifierRemoved, Some(entity.id), serde_json::json!({ "modifierId": mod_id })));
    cascade::run_batched(entity, config, events);
}
