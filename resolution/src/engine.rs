//! End-to-end resolution run: extract → search → resolve/submit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{LocatorError, LocatorResult};
use crate::lookup::LookupClient;
use crate::oracle::{CandidateResolver, Extraction, Extractor, Normalizer, SubmissionEndpoint};
use crate::search::{FrontierSearch, SearchConfig, SearchOutcome};
use crate::submission::{SubmissionLoop, SubmissionReport, DEFAULT_MAX_ATTEMPTS};

/// The external collaborators of one engine.
#[derive(Clone)]
pub struct Oracles {
    pub extractor: Arc<dyn Extractor>,
    pub normalizer: Arc<dyn Normalizer>,
    pub lookup: Arc<dyn LookupClient>,
    pub resolver: Arc<dyn CandidateResolver>,
    pub endpoint: Arc<dyn SubmissionEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub search: SearchConfig,
    pub max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> LocatorResult<()> {
        if self.max_attempts == 0 {
            return Err(LocatorError::Configuration(
                "max_attempts must be > 0".to_string(),
            ));
        }
        if self.search.max_parallel_lookups == 0 {
            return Err(LocatorError::Configuration(
                "max_parallel_lookups must be > 0".to_string(),
            ));
        }
        if self.search.target_name.trim().is_empty() {
            return Err(LocatorError::Configuration(
                "target_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    /// The endpoint accepted `place`.
    Located { place: String, submissions: u32 },
    /// The search reached its fixed point without a single candidate.
    NoCandidate,
    /// Search only; nothing was submitted.
    DryRun { candidates: Vec<String> },
    /// The submission loop ended without an accepted answer.
    Failed { reason: String },
}

/// Full record of one run, for logging and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    pub resolution: Resolution,
    pub extraction: Extraction,
    pub search: SearchOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<SubmissionReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ResolutionReport {
    /// `true` for an accepted answer or a dry run that found candidates.
    pub fn is_success(&self) -> bool {
        match &self.resolution {
            Resolution::Located { .. } => true,
            Resolution::DryRun { candidates } => !candidates.is_empty(),
            Resolution::NoCandidate | Resolution::Failed { .. } => false,
        }
    }
}

/// Owns the search and the submission loop for `resolve_location` calls.
///
/// Each call creates fresh search state; nothing carries over between runs.
pub struct LocationResolver {
    extractor: Arc<dyn Extractor>,
    search: FrontierSearch,
    submission: SubmissionLoop,
}

impl LocationResolver {
    pub fn new(oracles: Oracles, config: EngineConfig) -> LocatorResult<Self> {
        config.validate()?;
        Ok(Self {
            extractor: oracles.extractor,
            search: FrontierSearch::new(oracles.normalizer, oracles.lookup, config.search),
            submission: SubmissionLoop::new(oracles.resolver, oracles.endpoint, config.max_attempts),
        })
    }

    /// Resolve the target's current location and submit it.
    pub async fn resolve_location(&self, note: &str) -> ResolutionReport {
        self.run(note, false).await
    }

    /// Extract and search, but do not submit anything.
    pub async fn dry_run(&self, note: &str) -> ResolutionReport {
        self.run(note, true).await
    }

    async fn run(&self, note: &str, dry_run: bool) -> ResolutionReport {
        let started_at = Utc::now();
        let extraction = self.extractor.extract(note).await;
        if extraction.is_empty() {
            warn!("extraction found no persons or places in the note");
        }

        let search = self.search.search(&extraction).await;

        let (resolution, submission) = if !search.has_candidates() {
            info!(target_id = %search.target, "no candidate location found");
            (Resolution::NoCandidate, None)
        } else if dry_run {
            (
                Resolution::DryRun {
                    candidates: search.candidates.clone(),
                },
                None,
            )
        } else {
            let report = self.submission.run(note, &search).await;
            let resolution = match (&report.accepted, &report.failure) {
                (Some(place), _) => Resolution::Located {
                    place: place.clone(),
                    submissions: report.submissions(),
                },
                (None, failure) => Resolution::Failed {
                    reason: failure
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "submission loop ended without a verdict".to_string()),
                },
            };
            (resolution, Some(report))
        };

        ResolutionReport {
            resolution,
            extraction,
            search,
            submission,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        EngineConfig::default()
            .validate()
            .expect("default config should be valid");
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.max_attempts = 0;
        assert!(matches!(cfg.validate(), Err(LocatorError::Configuration(_))));
    }

    #[test]
    fn zero_parallelism_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.search.max_parallel_lookups = 0;
        assert!(cfg.validate().is_err());
    }
}
