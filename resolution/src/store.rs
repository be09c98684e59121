//! EntityStore: visited sets, pending queues and the association map.
//!
//! All mutation goes through a single mutex so that "check visited → mark
//! visited → dispatch" is one critical section per entity, even when the
//! frontier search fans lookups out across tasks.
//!
//! ```text
//! enqueue_if_new(e)   pending ∪= {e}    if e ∉ visited ∧ e ∉ pending
//! claim(e)            visited ∪= {e}    if e ∉ visited; pending −= {e}
//! record_association  person→place and place→person, grow-only
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind};

/// The only persisted "graph": two grow-only adjacency maps.
///
/// Ordered containers keep serialization deterministic, which the candidate
/// resolver prompt relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationMap {
    pub person_to_places: BTreeMap<String, BTreeSet<String>>,
    pub place_to_persons: BTreeMap<String, BTreeSet<String>>,
}

impl AssociationMap {
    /// Add the edge `person -- place` in both directions.
    pub fn insert(&mut self, person: &str, place: &str) {
        self.person_to_places
            .entry(person.to_string())
            .or_default()
            .insert(place.to_string());
        self.place_to_persons
            .entry(place.to_string())
            .or_default()
            .insert(person.to_string());
    }

    /// Make sure `entity` has an adjacency entry, possibly empty.
    pub fn touch(&mut self, entity: &Entity) {
        let side = match entity.kind {
            EntityKind::Person => &mut self.person_to_places,
            EntityKind::Place => &mut self.place_to_persons,
        };
        side.entry(entity.canonical_id.clone()).or_default();
    }

    pub fn places_of(&self, person: &str) -> Option<&BTreeSet<String>> {
        self.person_to_places.get(person)
    }

    pub fn persons_at(&self, place: &str) -> Option<&BTreeSet<String>> {
        self.place_to_persons.get(place)
    }

    pub fn edge_count(&self) -> usize {
        self.person_to_places.values().map(BTreeSet::len).sum()
    }

    /// `{person: [places]}` as pretty JSON.
    pub fn persons_json(&self) -> String {
        serde_json::to_string_pretty(&self.person_to_places).unwrap_or_else(|_| "{}".to_string())
    }

    /// `{place: [persons]}` as pretty JSON.
    pub fn places_json(&self) -> String {
        serde_json::to_string_pretty(&self.place_to_persons).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A duplicate-free FIFO queue.
#[derive(Debug, Default)]
struct PendingQueue {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl PendingQueue {
    fn push(&mut self, id: &str) -> bool {
        if !self.members.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        true
    }

    fn remove(&mut self, id: &str) {
        if self.members.remove(id) {
            self.order.retain(|queued| queued != id);
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    fn drain(&mut self) -> Vec<String> {
        self.members.clear();
        self.order.drain(..).collect()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    visited_persons: BTreeSet<String>,
    visited_places: BTreeSet<String>,
    pending_persons: PendingQueue,
    pending_places: PendingQueue,
    associations: AssociationMap,
}

impl StoreInner {
    fn visited(&self, kind: EntityKind) -> &BTreeSet<String> {
        match kind {
            EntityKind::Person => &self.visited_persons,
            EntityKind::Place => &self.visited_places,
        }
    }

    fn visited_mut(&mut self, kind: EntityKind) -> &mut BTreeSet<String> {
        match kind {
            EntityKind::Person => &mut self.visited_persons,
            EntityKind::Place => &mut self.visited_places,
        }
    }

    fn pending_mut(&mut self, kind: EntityKind) -> &mut PendingQueue {
        match kind {
            EntityKind::Person => &mut self.pending_persons,
            EntityKind::Place => &mut self.pending_places,
        }
    }
}

/// Visited/pending bookkeeping for one resolution run.
#[derive(Debug, Default)]
pub struct EntityStore {
    inner: Mutex<StoreInner>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the sets half-updated
    // (every mutation is a single insert/remove), so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark `entity` visited. Returns `true` if it was not visited before.
    pub fn mark_visited(&self, entity: &Entity) -> bool {
        self.lock()
            .visited_mut(entity.kind)
            .insert(entity.canonical_id.clone())
    }

    /// Queue `entity` unless it is already visited or pending.
    pub fn enqueue_if_new(&self, entity: &Entity) -> bool {
        let mut inner = self.lock();
        if inner.visited(entity.kind).contains(&entity.canonical_id) {
            return false;
        }
        inner.pending_mut(entity.kind).push(&entity.canonical_id)
    }

    /// Take ownership of `entity` for dispatch.
    ///
    /// Returns `true` exactly once per entity per run: the caller that gets
    /// `true` is the only one allowed to look the entity up.
    pub fn claim(&self, entity: &Entity) -> bool {
        let mut inner = self.lock();
        let fresh = inner
            .visited_mut(entity.kind)
            .insert(entity.canonical_id.clone());
        inner.pending_mut(entity.kind).remove(&entity.canonical_id);
        fresh
    }

    /// Drain the pending queue for `kind` in discovery order.
    pub fn next_batch(&self, kind: EntityKind) -> Vec<Entity> {
        self.lock()
            .pending_mut(kind)
            .drain()
            .into_iter()
            .map(|id| Entity::new(id, kind))
            .collect()
    }

    /// Record the edge `person -- place`.
    pub fn record_association(&self, person: &Entity, place: &Entity) {
        debug_assert_eq!(person.kind, EntityKind::Person);
        debug_assert_eq!(place.kind, EntityKind::Place);
        self.lock()
            .associations
            .insert(&person.canonical_id, &place.canonical_id);
    }

    /// Record that `entity` was looked up but yielded no associations.
    pub fn record_empty(&self, entity: &Entity) {
        self.lock().associations.touch(entity);
    }

    pub fn is_visited(&self, entity: &Entity) -> bool {
        self.lock()
            .visited(entity.kind)
            .contains(&entity.canonical_id)
    }

    pub fn is_pending(&self, entity: &Entity) -> bool {
        let inner = self.lock();
        match entity.kind {
            EntityKind::Person => inner.pending_persons.contains(&entity.canonical_id),
            EntityKind::Place => inner.pending_places.contains(&entity.canonical_id),
        }
    }

    /// `true` while either pending queue still holds work.
    pub fn has_pending(&self) -> bool {
        let inner = self.lock();
        !inner.pending_persons.is_empty() || !inner.pending_places.is_empty()
    }

    pub fn visited(&self, kind: EntityKind) -> BTreeSet<String> {
        self.lock().visited(kind).clone()
    }

    pub fn associations(&self) -> AssociationMap {
        self.lock().associations.clone()
    }
}
