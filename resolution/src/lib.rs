//! Location resolution over a person↔place co-occurrence relation.
//!
//! Given a note mentioning people and cities, the engine finds where a
//! target person currently is. The relation is only observable through two
//! lookup oracles (`person → places`, `place → persons`), either of which
//! may answer with a restricted-data sentinel that itself means "the target
//! is associated with this entity".
//!
//! # Pipeline
//!
//! ```text
//! note ─► Extractor ─► FrontierSearch ─► CandidateResolver ⇄ SubmissionLoop ─► Resolution
//!                      (Normalizer, LookupClient, EntityStore)
//! ```
//!
//! # Modules
//!
//! | Module       | Purpose                                               |
//! |--------------|-------------------------------------------------------|
//! | `entity`     | Person / place entities keyed by canonical id         |
//! | `store`      | Visited sets, pending queues, association map         |
//! | `lookup`     | Lookup oracle contract and reply classification       |
//! | `oracle`     | Extraction, normalization, resolver, submission traits |
//! | `search`     | Worklist traversal producing candidate locations      |
//! | `submission` | Submit / reject / exclude / retry state machine       |
//! | `engine`     | `LocationResolver`: one end-to-end run                |
//! | `error`      | Error taxonomy with recovery classification           |
//!
//! All oracles are traits, so the whole engine runs against deterministic
//! stubs in tests.

pub mod engine;
pub mod entity;
pub mod error;
pub mod lookup;
pub mod oracle;
pub mod search;
pub mod store;
pub mod submission;

pub use engine::{EngineConfig, LocationResolver, Oracles, Resolution, ResolutionReport};
pub use entity::{Entity, EntityKind};
pub use error::{LocatorError, LocatorResult, RecoveryCategory};
pub use lookup::{LookupClient, LookupResult, LookupStatus, RESTRICTED_SENTINEL};
pub use oracle::{
    Candidate, CandidateResolver, Extraction, Extractor, Normalizer, ResolverInput,
    SubmissionEndpoint, SubmissionReceipt,
};
pub use search::{FrontierSearch, SearchConfig, SearchOutcome};
pub use store::{AssociationMap, EntityStore};
pub use submission::{SubmissionLoop, SubmissionReport, SubmissionState};
