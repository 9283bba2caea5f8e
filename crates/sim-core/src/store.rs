//! Entity Store, Groups, History: `stored`/`active` index views,
//! capacity enforcement, synthetic config groups, and a per-entity
//! snapshot ring supporting rollback.

use std::collections::{HashMap, HashSet, VecDeque};

use shared::constants::{DEFAULT_MAX_ENTITIES, DEFAULT_MAX_HISTORY};

use crate::events::{Event, EventBus, EventKind};
use crate::types::{Entity, Snapshot, Timestamp};

/// Entity Store: owns every entity's canonical state plus `stored`/
/// `active` membership, groups, and history rings.
pub struct EntityStore {
    entities: HashMap<uuid::Uuid, Entity>,
    stored: HashSet<uuid::Uuid>,
    active: HashSet<uuid::Uuid>,
    groups: HashMap<String, HashSet<uuid::Uuid>>,
    history: HashMap<uuid::Uuid, VecDeque<Snapshot>>,
    max_entities: usize,
    max_history: usize,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTITIES, DEFAULT_MAX_HISTORY)
    }
}

impl EntityStore {
    pub fn new(max_entities: usize, max_history: usize) -> Self {
        Self {
            entities: HashMap::new(),
            stored: HashSet::new(),
            active: HashSet::new(),
            groups: HashMap::new(),
            history: HashMap::new(),
            max_entities,
            max_history,
        }
    }

    /// Store an entity, auto-joining the synthetic `config:<configId>`
    /// group. Rejects when `stored.len() >= max_entities`.
    pub fn store(&mut self, entity: Entity, events: &EventBus) -> bool {
        if self.stored.len() >= self.max_entities {
            events.emit(Event::new(EventKind::StorageLimitReached, Some(entity.id), serde_json::json!({})));
            return false;
        }
        let id = entity.id;
        let config_group = format!("config:{}", entity.config_id);
        self.stored.insert(id);
        self.groups.entry(config_group).or_default().insert(id);
        self.entities.insert(id, entity);
        events.emit(Event::new(EventKind::EntityStored, Some(id), serde_json::json!({})));
        true
    }

    pub fn activate(&mut self, id: uuid::Uuid, events: &EventBus) -> bool {
        if !self.stored.contains(&id) {
            return false;
        }
        self.active.insert(id);
        events.emit(Event::new(EventKind::EntityActivated, Some(id), serde_json::json!({})));
        true
    }

    pub fn deactivate(&mut self, id: uuid::Uuid, events: &EventBus) -> bool {
        let removed = self.active.remove(&id);
        if removed {
            events.emit(Event::new(EventKind::EntityDeactivated, Some(id), serde_json::json!({})));
        }
        removed
    }

    /// Drop an entity from both `stored`/`active`, its history, and
    /// every group.
    pub fn remove(&mut self, id: uuid::Uuid, events: &EventBus) -> Option<Entity> {
        self.stored.remove(&id);
        self.active.remove(&id);
        self.history.remove(&id);
        for members in self.groups.values_mut() {
            members.remove(&id);
        }
        let removed = self.entities.remove(&id);
        if removed.is_some() {
            events.emit(Event::new(EventKind::EntityRemoved, Some(id), serde_json::json!({})));
        }
        removed
    }

    pub fn get(&self, id: uuid::Uuid) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: uuid::Uuid) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn is_stored(&self, id: uuid::Uuid) -> bool {
        self.stored.contains(&id)
    }

    pub fn is_active(&self, id: uuid::Uuid) -> bool {
        self.active.contains(&id)
    }

    pub fn stored_count(&self) -> usize {
        self.stored.len()
    }

    pub fn active_ids(&self) -> Vec<uuid::Uuid> {
        self.active.iter().copied().collect()
    }

    /// Add an entity to an arbitrary named group, emitting `groupCreated`
    /// the first time the group is referenced.
    pub fn add_to_group(&mut self, group: &str, id: uuid::Uuid, events: &EventBus) {
        let is_new_group = !self.groups.contains_key(group);
        self.groups.entry(group.to_string()).or_default().insert(id);
        if is_new_group {
            events.emit(Event::new(EventKind::GroupCreated, None, serde_json::json!({ "group": group })));
        }
        events.emit(Event::new(EventKind::AddedToGroup, Some(id), serde_json::json!({ "group": group })));
    }

    pub fn group_members(&self, group: &str) -> Vec<uuid::Uuid> {
        self.groups.get(group).into_iter().flatten().copied().collect()
    }

    /// Explicitly create an empty group, emitting `groupCreated` if it
    /// didn't already exist. A no-op (no duplicate event) if it did.
    pub fn create_group(&mut self, group: &str, events: &EventBus) {
        if self.groups.contains_key(group) {
            return;
        }
        self.groups.insert(group.to_string(), HashSet::new());
        events.emit(Event::new(EventKind::GroupCreated, None, serde_json::json!({ "group": group })));
    }

    pub fn remove_from_group(&mut self, group: &str, id: uuid::Uuid) -> bool {
        self.groups.get_mut(group).map(|members| members.remove(&id)).unwrap_or(false)
    }

    pub fn list_groups(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub fn delete_group(&mut self, group: &str) -> bool {
        self.groups.remove(group).is_some()
    }

    pub fn get_history(&self, id: uuid::Uuid) -> Vec<Snapshot> {
        self.history.get(&id).map(|ring| ring.iter().cloned().collect()).unwrap_or_default()
    }

    /// Entities matching `group` (when given) and/or `active_only`. The
    /// baseline query filter for the public `query` operation.
    pub fn query(&self, group: Option<&str>, active_only: bool) -> Vec<uuid::Uuid> {
        let candidates: Vec<uuid::Uuid> = match group {
            Some(g) => self.group_members(g),
            None => self.entities.keys().copied().collect(),
        };
        candidates.into_iter().filter(|id| !active_only || self.active.contains(id)).collect()
    }

    /// Capture a snapshot, pushing onto the entity's history ring,
    /// evicting the oldest entry once `max_history` is exceeded.
    pub fn snapshot(&mut self, id: uuid::Uuid, timestamp: Timestamp, events: &EventBus) -> bool {
        let Some(entity) = self.entities.get(&id) else { return false };
        let snapshot = Snapshot::capture(entity, timestamp);
        let ring = self.history.entry(id).or_default();
        ring.push_back(snapshot);
        while ring.len() > self.max_history {
            ring.pop_front();
        }
        events.emit(Event::new(EventKind::SnapshotTaken, Some(id), serde_json::json!({})));
        true
    }

    /// Restore the newest snapshot with `timestamp <= at` into the live
    /// entity. Variable rates are left for the caller to recompute via
    /// cascade, not restored verbatim.
    pub fn rollback(&mut self, id: uuid::Uuid, at: Timestamp, events: &EventBus) -> bool {
        let Some(ring) = self.history.get(&id) else { return false };
        let Some(snapshot) = ring.iter().rev().find(|s| s.timestamp <= at) else { return false };
        let snapshot = snapshot.clone();
        let Some(entity) = self.entities.get_mut(&id) else { return false };
        snapshot.restore_into(entity);
        events.emit(Event::new(EventKind::EntityRolledBack, Some(id), serde_json::json!({ "at": at })));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityInternal;
    use chrono::Utc;

    fn blank_entity() -> Entity {
        Entity {
            id: uuid::Uuid::new_v4(),
            config_id: "cfg".into(),
            created_at: Utc::now(),
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

    #[test]
    fn store_rejects_past_capacity() {
        let mut store = EntityStore::new(1, 50);
        let events = EventBus::new();
        assert!(store.store(blank_entity(), &events));
        assert!(!store.store(blank_entity(), &events));
    }

    #[test]
    fn store_joins_synthetic_config_group() {
        let mut store = EntityStore::new(10, 50);
        let events = EventBus::new();
        let entity = blank_entity();
        let id = entity.id;
        store.store(entity, &events);
        assert!(store.group_members("config:cfg").contains(&id));
    }

    #[test]
    fn remove_clears_all_indexes() {
        let mut store = EntityStore::new(10, 50);
        let events = EventBus::new();
        let entity = blank_entity();
        let id = entity.id;
        store.store(entity, &events);
        store.activate(id, &events);
        store.remove(id, &events);
        assert!(!store.is_stored(id));
        assert!(!store.is_active(id));
        assert!(!store.group_members("config:cfg").contains(&id));
    }

    #[test]
    fn rollback_restores_newest_snapshot_at_or_before_timestamp() {
        let mut store = EntityStore::new(10, 50);
        let events = EventBus::new();
        let mut entity = blank_entity();
        let id = entity.id;
        entity.attributes.insert("power".into(), 1.0);
        store.store(entity, &events);

        let t1 = Utc::now();
        store.snapshot(id, t1, &events);
        store.get_mut(id).unwrap().attributes.insert("power".into(), 99.0);

        store.rollback(id, t1, &events);
        assert_eq!(store.get(id).unwrap().attributes["power"], 1.0);
    }

    #[test]
    fn history_ring_evicts_oldest_past_cap() {
        let mut store = EntityStore::new(10, 2);
        let events = EventBus::new();
        let entity = blank_entity();
        let id = entity.id;
        store.store(entity, &events);
        for i in 0..5 {
            store.snapshot(id, Utc::now() + chrono::Duration::seconds(i), &events);
        }
        assert_eq!(store.history.get(&id).unwrap().len(), 2);
    }
}
