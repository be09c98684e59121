//! Error taxonomy for the location-resolution engine.
//!
//! Every failure the engine can observe is represented here. Callers ask
//! `recovery_category()` / `is_recoverable()` instead of matching strings.
//!
//! ## Recovery categories
//!
//! | Category   | Recovered by                                   |
//! |------------|------------------------------------------------|
//! | Degrade    | treating the entity as empty, search continues |
//! | Exclude    | adding the candidate to the exclusion set      |
//! | Terminal   | nothing; the run ends with a reported failure  |
//!
//! Restricted data is not an error: it is a `LookupStatus` variant.

use std::fmt;

use thiserror::Error;

/// Result alias for engine operations.
pub type LocatorResult<T> = Result<T, LocatorError>;

/// How the engine recovers from an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryCategory {
    /// Oracle call failed or returned garbage; fall back to an empty result.
    Degrade,
    /// Submission did not go through; exclude the candidate and retry.
    Exclude,
    /// The run cannot continue.
    Terminal,
}

impl RecoveryCategory {
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::Terminal)
    }
}

impl fmt::Display for RecoveryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Degrade => write!(f, "degrade"),
            Self::Exclude => write!(f, "exclude"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Unified error type for the engine and its oracle adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    // ── Recovered locally ────────────────────────────────────────────────
    /// Network / HTTP failure talking to an oracle or the submission endpoint.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An oracle answered with something that could not be decoded.
    #[error("Malformed oracle response from {oracle}: {message}")]
    MalformedOracleResponse { oracle: String, message: String },

    /// The submission endpoint refused the answer.
    #[error("Submission of {answer:?} rejected: {message}")]
    SubmissionRejected { answer: String, message: String },

    // ── Terminal ─────────────────────────────────────────────────────────
    /// The candidate resolver could not name a place.
    #[error("Candidate resolver returned no usable candidate")]
    ResolverUnknown,

    /// Every candidate found by the search has already been rejected.
    #[error("All {0} candidates have been excluded")]
    CandidatesExhausted(usize),

    /// The submission ceiling was reached without an accepted answer.
    #[error("Max submission attempts ({0}) exhausted")]
    AttemptsExhausted(u32),

    /// Configuration is invalid or missing required fields.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LocatorError {
    pub fn recovery_category(&self) -> RecoveryCategory {
        match self {
            Self::Transport(_) | Self::MalformedOracleResponse { .. } => RecoveryCategory::Degrade,
            Self::SubmissionRejected { .. } => RecoveryCategory::Exclude,
            Self::ResolverUnknown
            | Self::CandidatesExhausted(_)
            | Self::AttemptsExhausted(_)
            | Self::Configuration(_) => RecoveryCategory::Terminal,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recovery_category().is_recoverable()
    }

    /// Build a `MalformedOracleResponse` conveniently.
    pub fn malformed(oracle: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedOracleResponse {
            oracle: oracle.into(),
            message: message.into(),
        }
    }

    pub fn rejected(answer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SubmissionRejected {
            answer: answer.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_degrades() {
        let err = LocatorError::Transport("connection reset".into());
        assert_eq!(err.recovery_category(), RecoveryCategory::Degrade);
        assert!(err.is_recoverable());
    }

    #[test]
    fn rejection_excludes() {
        let err = LocatorError::rejected("GRUDZIADZ", "wrong answer");
        assert_eq!(err.recovery_category(), RecoveryCategory::Exclude);
        assert!(err.to_string().contains("GRUDZIADZ"));
    }

    #[test]
    fn exhaustion_is_terminal() {
        assert!(!LocatorError::AttemptsExhausted(5).is_recoverable());
        assert!(!LocatorError::CandidatesExhausted(2).is_recoverable());
        assert!(!LocatorError::ResolverUnknown.is_recoverable());
    }

    #[test]
    fn malformed_names_the_oracle() {
        let err = LocatorError::malformed("extraction", "expected value at line 1");
        assert_eq!(
            err.to_string(),
            "Malformed oracle response from extraction: expected value at line 1"
        );
    }
}
