//! FrontierSearch: worklist traversal of the person↔place relation.
//!
//! ```text
//! seed(extraction)                  normalize + enqueue persons / places
//! loop while anything is pending:
//!   person phase: claim p → lookup_person(p) → enqueue new places
//!   place phase:  claim c → lookup_place(c)  → enqueue new persons,
//!                 Restricted or target seen  → candidate (unless prior)
//! ```
//!
//! Each phase drains a snapshot of its queue; entities discovered during a
//! phase land in the other kind's queue and are picked up by the next
//! phase. The universe of canonical ids reachable from a finite seed is
//! finite and `claim` never succeeds twice, so the loop reaches a fixed
//! point.
//!
//! With `max_parallel_lookups > 1` a phase fans its batch out on a
//! `JoinSet`, bounded by a semaphore. Exclusivity still comes from
//! `EntityStore::claim`, not from batching.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::entity::{Entity, EntityKind};
use crate::lookup::{LookupClient, LookupStatus};
use crate::oracle::{Extraction, Normalizer};
use crate::store::{AssociationMap, EntityStore};

/// Default name of the person whose whereabouts are being resolved.
pub const DEFAULT_TARGET_NAME: &str = "BARBARA";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Raw name of the target; normalized once at seed time.
    pub target_name: String,
    /// Upper bound on concurrent lookups within one phase (1 = sequential).
    pub max_parallel_lookups: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            target_name: DEFAULT_TARGET_NAME.to_string(),
            max_parallel_lookups: 1,
        }
    }
}

/// Why a place became a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSignal {
    /// `lookup_place` answered with the restricted sentinel.
    Restricted,
    /// The target's canonical name was among the persons seen there.
    TargetSeen,
}

/// Mutable state of one search, shared by the tasks of a phase.
#[derive(Debug)]
pub struct SearchState {
    store: EntityStore,
    target: String,
    prior_locations: BTreeSet<String>,
    candidates: Mutex<Vec<String>>,
    flags: Mutex<Vec<String>>,
    lookups: AtomicUsize,
}

impl SearchState {
    pub fn new(target: impl Into<String>, prior_locations: BTreeSet<String>) -> Self {
        Self {
            store: EntityStore::new(),
            target: target.into(),
            prior_locations,
            candidates: Mutex::new(Vec::new()),
            flags: Mutex::new(Vec::new()),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Canonical id of the target.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_prior_location(&self, place: &str) -> bool {
        self.prior_locations.contains(place)
    }

    /// Append `place` to the candidate set unless it is a known prior
    /// location or already present. Returns `true` if it was appended.
    pub fn add_candidate(&self, place: &str, signal: CandidateSignal) -> bool {
        if self.is_prior_location(place) {
            debug!(place, ?signal, "signal on known prior location ignored");
            return false;
        }
        let mut candidates = self
            .candidates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if candidates.iter().any(|c| c == place) {
            return false;
        }
        info!(place, ?signal, "candidate location found");
        candidates.push(place.to_string());
        true
    }

    pub fn candidates(&self) -> Vec<String> {
        self.candidates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record_flag(&self, entity: &Entity, flag: String) {
        let mut flags = self
            .flags
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !flags.contains(&flag) {
            info!(entity = %entity, flag = %flag, "flag found in lookup response");
            flags.push(flag);
        }
    }

    pub fn flags(&self) -> Vec<String> {
        self.flags
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of lookups dispatched so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

/// Everything the search learned, handed to the candidate resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub target: String,
    /// Current-location candidates in discovery order.
    pub candidates: Vec<String>,
    pub associations: AssociationMap,
    pub visited_persons: BTreeSet<String>,
    pub visited_places: BTreeSet<String>,
    pub prior_locations: BTreeSet<String>,
    pub flags: Vec<String>,
    pub rounds: u32,
    pub lookups: usize,
}

impl SearchOutcome {
    pub fn has_candidates(&self) -> bool {
        !self.candidates.is_empty()
    }
}

/// The traversal engine.
pub struct FrontierSearch {
    normalizer: Arc<dyn Normalizer>,
    lookup: Arc<dyn LookupClient>,
    config: SearchConfig,
}

impl FrontierSearch {
    pub fn new(
        normalizer: Arc<dyn Normalizer>,
        lookup: Arc<dyn LookupClient>,
        config: SearchConfig,
    ) -> Self {
        Self {
            normalizer,
            lookup,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Seed + run to the fixed point.
    pub async fn search(&self, extraction: &Extraction) -> SearchOutcome {
        let state = Arc::new(self.seed(extraction).await);
        self.run(state).await
    }

    /// Normalize the extracted entities and build the initial state.
    pub async fn seed(&self, extraction: &Extraction) -> SearchState {
        let target = self
            .normalizer
            .normalize(&self.config.target_name, EntityKind::Person)
            .await;

        let mut prior_locations = BTreeSet::new();
        for raw in &extraction.prior_locations {
            let place = self.normalizer.normalize(raw, EntityKind::Place).await;
            if !place.is_empty() {
                prior_locations.insert(place);
            }
        }

        let state = SearchState::new(target, prior_locations);
        let seeds = extraction
            .persons
            .iter()
            .map(|raw| (raw, EntityKind::Person))
            .chain(extraction.places.iter().map(|raw| (raw, EntityKind::Place)));
        for (raw, kind) in seeds {
            let id = self.normalizer.normalize(raw, kind).await;
            if id.is_empty() {
                warn!(raw = %raw, %kind, "seed normalized to empty id, skipped");
                continue;
            }
            state.store.enqueue_if_new(&Entity::new(id, kind));
        }

        info!(
            target_id = %state.target,
            persons = extraction.persons.len(),
            places = extraction.places.len(),
            prior_locations = state.prior_locations.len(),
            "search seeded"
        );
        state
    }

    /// Alternate person and place phases until both queues are empty.
    pub async fn run(&self, state: Arc<SearchState>) -> SearchOutcome {
        let mut rounds: u32 = 0;
        while state.store.has_pending() {
            rounds += 1;
            let persons = self.run_phase(&state, EntityKind::Person).await;
            let places = self.run_phase(&state, EntityKind::Place).await;
            debug!(round = rounds, persons, places, "search round complete");
        }

        let outcome = SearchOutcome {
            target: state.target.clone(),
            candidates: state.candidates(),
            associations: state.store.associations(),
            visited_persons: state.store.visited(EntityKind::Person),
            visited_places: state.store.visited(EntityKind::Place),
            prior_locations: state.prior_locations.clone(),
            flags: state.flags(),
            rounds,
            lookups: state.lookups(),
        };
        info!(
            rounds,
            lookups = outcome.lookups,
            candidates = ?outcome.candidates,
            "search reached fixed point"
        );
        outcome
    }

    /// Drain one queue. Returns how many entities were taken from it.
    async fn run_phase(&self, state: &Arc<SearchState>, kind: EntityKind) -> usize {
        let batch = state.store.next_batch(kind);
        let taken = batch.len();
        if batch.is_empty() {
            return 0;
        }

        if self.config.max_parallel_lookups <= 1 {
            for entity in batch {
                expand(&*self.normalizer, &*self.lookup, state, entity).await;
            }
            return taken;
        }

        let sem = Arc::new(Semaphore::new(self.config.max_parallel_lookups));
        let mut join_set: JoinSet<()> = JoinSet::new();
        for entity in batch {
            let permit = match sem.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!(error = %e, "lookup semaphore closed");
                    break;
                }
            };
            let normalizer = self.normalizer.clone();
            let lookup = self.lookup.clone();
            let state = state.clone();
            join_set.spawn(async move {
                let _permit = permit;
                expand(&*normalizer, &*lookup, &state, entity).await;
            });
        }

        while let Some(res) = join_set.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, %kind, "lookup task panicked");
            }
        }
        taken
    }
}

/// Claim, look up and expand a single entity.
async fn expand(
    normalizer: &dyn Normalizer,
    lookup: &dyn LookupClient,
    state: &SearchState,
    entity: Entity,
) {
    if !state.store.claim(&entity) {
        return;
    }
    state.lookups.fetch_add(1, Ordering::SeqCst);

    let result = lookup.lookup(entity.kind, entity.id()).await;
    debug!(entity = %entity, status = result.status.label(), "lookup");
    if let Some(flag) = result.flag {
        state.record_flag(&entity, flag);
    }

    match (entity.kind, result.status) {
        (EntityKind::Person, LookupStatus::Ok(tokens)) => {
            state.store.record_empty(&entity);
            for token in tokens {
                let id = normalizer.normalize(&token, EntityKind::Place).await;
                if id.is_empty() {
                    continue;
                }
                let place = Entity::place(id);
                state.store.record_association(&entity, &place);
                state.store.enqueue_if_new(&place);
            }
        }
        (EntityKind::Place, LookupStatus::Restricted) => {
            state.add_candidate(entity.id(), CandidateSignal::Restricted);
        }
        (EntityKind::Place, LookupStatus::Ok(tokens)) => {
            state.store.record_empty(&entity);
            for token in tokens {
                let id = normalizer.normalize(&token, EntityKind::Person).await;
                if id.is_empty() {
                    continue;
                }
                let person = Entity::person(id);
                state.store.record_association(&person, &entity);
                state.store.enqueue_if_new(&person);
                if person.canonical_id == state.target {
                    state.add_candidate(entity.id(), CandidateSignal::TargetSeen);
                }
            }
        }
        (_, status) => {
            if status.is_degraded() {
                warn!(entity = %entity, status = ?status, "lookup degraded, treating as empty");
            }
            state.store.record_empty(&entity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::LookupResult;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct UpperNormalizer;

    #[async_trait]
    impl Normalizer for UpperNormalizer {
        async fn normalize(&self, raw: &str, _kind: EntityKind) -> String {
            raw.trim().to_uppercase()
        }
    }

    #[derive(Default)]
    struct TableLookup {
        persons: HashMap<String, LookupResult>,
        places: HashMap<String, LookupResult>,
        calls: Mutex<Vec<Entity>>,
    }

    impl TableLookup {
        fn person(mut self, id: &str, result: LookupResult) -> Self {
            self.persons.insert(id.to_string(), result);
            self
        }

        fn place(mut self, id: &str, result: LookupResult) -> Self {
            self.places.insert(id.to_string(), result);
            self
        }
    }

    #[async_trait]
    impl LookupClient for TableLookup {
        async fn lookup_person(&self, canonical_id: &str) -> LookupResult {
            self.calls.lock().unwrap().push(Entity::person(canonical_id));
            self.persons
                .get(canonical_id)
                .cloned()
                .unwrap_or_else(LookupResult::not_found)
        }

        async fn lookup_place(&self, canonical_id: &str) -> LookupResult {
            self.calls.lock().unwrap().push(Entity::place(canonical_id));
            self.places
                .get(canonical_id)
                .cloned()
                .unwrap_or_else(LookupResult::not_found)
        }
    }

    fn extraction(persons: &[&str], places: &[&str], prior: &[&str]) -> Extraction {
        Extraction {
            persons: persons.iter().map(|s| s.to_string()).collect(),
            places: places.iter().map(|s| s.to_string()).collect(),
            prior_locations: prior.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn search_with(lookup: Arc<TableLookup>) -> FrontierSearch {
        FrontierSearch::new(Arc::new(UpperNormalizer), lookup, SearchConfig::default())
    }

    #[tokio::test]
    async fn target_seen_makes_candidate() {
        let lookup = Arc::new(
            TableLookup::default()
                .person("ADAM", LookupResult::ok(["GRUDZIADZ"]))
                .place("GRUDZIADZ", LookupResult::ok(["ADAM", "BARBARA"])),
        );
        let outcome = search_with(lookup.clone())
            .search(&extraction(&["adam"], &[], &[]))
            .await;

        assert_eq!(outcome.candidates, vec!["GRUDZIADZ"]);
        assert_eq!(outcome.target, "BARBARA");
        assert!(outcome.visited_persons.contains("BARBARA"));
        assert_eq!(outcome.lookups, lookup.calls.lock().unwrap().len());
    }

    #[tokio::test]
    async fn restricted_prior_location_is_not_a_candidate() {
        let lookup = Arc::new(TableLookup::default().place("LUBAWA", LookupResult::restricted()));
        let outcome = search_with(lookup)
            .search(&extraction(&[], &["Lubawa"], &["lubawa"]))
            .await;
        assert!(outcome.candidates.is_empty());
        assert!(outcome.visited_places.contains("LUBAWA"));
    }

    #[tokio::test]
    async fn restricted_person_is_not_expanded() {
        let lookup = Arc::new(TableLookup::default().person("BARBARA", LookupResult::restricted()));
        let outcome = search_with(lookup.clone())
            .search(&extraction(&["BARBARA"], &[], &[]))
            .await;
        assert!(outcome.candidates.is_empty());
        assert_eq!(lookup.calls.lock().unwrap().len(), 1);
        assert!(outcome.associations.places_of("BARBARA").unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_error_degrades_and_continues() {
        let lookup = Arc::new(
            TableLookup::default()
                .person("ADAM", LookupResult::transport_error("connection refused"))
                .person("RAFAL", LookupResult::ok(["ELBLAG"]))
                .place("ELBLAG", LookupResult::restricted()),
        );
        let outcome = search_with(lookup)
            .search(&extraction(&["ADAM", "RAFAL"], &[], &[]))
            .await;
        assert_eq!(outcome.candidates, vec!["ELBLAG"]);
        assert!(outcome.visited_persons.contains("ADAM"));
        assert!(outcome.associations.places_of("ADAM").unwrap().is_empty());
    }

    #[tokio::test]
    async fn flags_are_collected_once() {
        let lookup = Arc::new(
            TableLookup::default()
                .place("KRAKOW", LookupResult::ok(["ADAM"]).with_flag("{{FLG:X}}"))
                .person("ADAM", LookupResult::ok(["WARSZAWA"]).with_flag("{{FLG:X}}")),
        );
        let outcome = search_with(lookup)
            .search(&extraction(&[], &["KRAKOW"], &[]))
            .await;
        assert_eq!(outcome.flags, vec!["{{FLG:X}}"]);
    }

    #[test]
    fn candidate_set_suppresses_duplicates() {
        let state = SearchState::new("BARBARA", BTreeSet::new());
        assert!(state.add_candidate("ELBLAG", CandidateSignal::Restricted));
        assert!(!state.add_candidate("ELBLAG", CandidateSignal::TargetSeen));
        assert_eq!(state.candidates(), vec!["ELBLAG"]);
    }
}
