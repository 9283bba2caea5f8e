//! Synchronous event bus.
//!
//! Every engine operation that mutates entity/pool/store state emits an
//! event after the mutation lands. Subscribers are plain closures kept
//! in a per-kind list; a failing subscriber is caught and logged, never
//! allowed to unwind into the caller (grounded on `aggregator/mod.rs`'s
//! catch-and-log treatment of subsystem failures).

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value as JsonValue;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    EntitySpawned,
    EntityStored,
    EntityActivated,
    EntityDeactivated,
    EntityRemoved,
    VariableChanged,
    ModifierApplied,
    ModifierRemoved,
    TraitActivated,
    TraitDeactivated,
    CompoundActivated,
    CompoundDeactivated,
    Tick,
    AutoTickStarted,
    AutoTickStopped,
    SnapshotTaken,
    EntityRolledBack,
    SpawnContextUpdated,
    PresetRegistered,
    GroupCreated,
    AddedToGroup,
    EntityAcquired,
    EntityReleased,
    PoolCreated,
    PoolRemoved,
    PoolConfigured,
    PoolRulesUpdated,
    EntityMovedPool,
    StorageLimitReached,
}

/// A fired event: its kind, the entity id it concerns (if any), and an
/// opaque JSON payload subscribers interpret by convention.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub entity_id: Option<uuid::Uuid>,
    pub payload: JsonValue,
}

impl Event {
    pub fn new(kind: EventKind, entity_id: Option<uuid::Uuid>, payload: JsonValue) -> Self {
        Self { kind, entity_id, payload }
    }
}

pub type SubscriptionId = u64;

type Listener = Box<dyn Fn(&Event) + Send + Sync>;

/// Synchronous pub/sub bus, one subscriber list per `EventKind`.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<HashMap<EventKind, Vec<(SubscriptionId, Listener)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self { listeners: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Register a listener for `kind`, returning a handle for `unsubscribe`.
    pub fn subscribe(&self, kind: EventKind, listener: Listener) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().unwrap().entry(kind).or_default().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) {
        if let Some(list) = self.listeners.lock().unwrap().get_mut(&kind) {
            list.retain(|(existing, _)| *existing != id);
        }
    }

    /// Dispatch `event` to every subscriber of its kind. A panicking
    /// listener is caught and logged; it never aborts the rest of the
    /// dispatch or propagates to the caller.
    pub fn emit(&self, event: Event) {
        let listeners = self.listeners.lock().unwrap();
        let Some(list) = listeners.get(&event.kind) else { return };
        for (id, listener) in list {
            let result = catch_unwind(AssertUnwindSafe(|| listener(&event)));
            if result.is_err() {
                error!("event listener {id} panicked handling {:?}", event.kind);
            }
        }
    }
}
