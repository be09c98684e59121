//! External capabilities the engine consumes but does not implement.
//!
//! | Trait                | Contract                                          |
//! |----------------------|---------------------------------------------------|
//! | `Extractor`          | note → raw persons, places, prior locations       |
//! | `Normalizer`         | raw string + kind → canonical id                  |
//! | `CandidateResolver`  | associations + candidates + exclusions → a place  |
//! | `SubmissionEndpoint` | answer → accepted / rejected                      |
//!
//! None of the oracles may abort a run: adapters fold their own failures
//! into empty extractions, a best-effort normalization or `Candidate::Unknown`.
//! Only the submission endpoint reports errors, and those count as rejections.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;
use crate::error::LocatorResult;
use crate::store::AssociationMap;

/// Raw (un-normalized) entities surfaced from the note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub persons: BTreeSet<String>,
    pub places: BTreeSet<String>,
    /// Places the target is documented to have been in *before*.
    pub prior_locations: BTreeSet<String>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.persons.is_empty() && self.places.is_empty()
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, note: &str) -> Extraction;
}

/// Canonicalizes names and cities.
///
/// Expected to be deterministic for a given input, but not injective and
/// not guaranteed to merge every misspelling.
#[async_trait]
pub trait Normalizer: Send + Sync {
    async fn normalize(&self, raw: &str, kind: EntityKind) -> String;
}

/// The resolver's pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Candidate {
    Place(String),
    Unknown,
}

impl Candidate {
    /// Interpret a free-text oracle answer.
    pub fn from_answer(raw: &str) -> Self {
        let answer = raw.trim().trim_matches(|c| c == '"' || c == '.').trim();
        if answer.is_empty() || answer.eq_ignore_ascii_case("unknown") {
            Self::Unknown
        } else {
            Self::Place(answer.to_uppercase())
        }
    }
}

/// Everything the candidate resolver gets to see.
#[derive(Debug, Clone, Copy)]
pub struct ResolverInput<'a> {
    pub note: &'a str,
    pub associations: &'a AssociationMap,
    pub candidates: &'a [String],
    pub excluded: &'a BTreeSet<String>,
}

impl ResolverInput<'_> {
    /// Candidates as a JSON array, in discovery order.
    pub fn candidates_json(&self) -> String {
        serde_json::to_string_pretty(self.candidates).unwrap_or_else(|_| "[]".to_string())
    }

    /// Excluded places, sorted and comma-separated.
    pub fn excluded_list(&self) -> String {
        self.excluded
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
pub trait CandidateResolver: Send + Sync {
    async fn resolve(&self, input: &ResolverInput<'_>) -> Candidate;
}

/// What the submission endpoint said when it accepted an answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub code: i64,
    pub message: String,
}

/// The endpoint answers are reported to.
///
/// `Ok` means accepted. Any `Err` (rejection or transport failure) is
/// treated as a rejection of that answer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmissionEndpoint: Send + Sync {
    async fn submit(&self, answer: &str) -> LocatorResult<SubmissionReceipt>;
}
