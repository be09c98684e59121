//! SubmissionLoop: select, submit, exclude on rejection, retry.
//!
//! ```text
//! Selecting → Submitted → Accepted                (terminal)
//!                       → Rejected → Selecting
//! any non-terminal      → Failed                  (terminal)
//! ```
//!
//! Every run is bounded by `max_attempts` submissions. A candidate that was
//! rejected once is never submitted again; if the resolver proposes one
//! anyway the loop treats it as "unknown" and stops.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::error::LocatorError;
use crate::oracle::{
    Candidate, CandidateResolver, ResolverInput, SubmissionEndpoint, SubmissionReceipt,
};
use crate::search::SearchOutcome;

/// Default ceiling on submissions per run.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    /// Asking the candidate resolver for the next answer.
    Selecting,
    /// Waiting for the endpoint's verdict.
    Submitted,
    /// Answer accepted. Terminal.
    Accepted,
    /// Answer refused; it joins the exclusion set.
    Rejected,
    /// Out of attempts or candidates. Terminal.
    Failed,
}

impl SubmissionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Failed)
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Selecting => write!(f, "Selecting"),
            Self::Submitted => write!(f, "Submitted"),
            Self::Accepted => write!(f, "Accepted"),
            Self::Rejected => write!(f, "Rejected"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

fn is_legal_transition(from: SubmissionState, to: SubmissionState) -> bool {
    use SubmissionState::*;

    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Selecting, Submitted)
            | (Submitted, Accepted)
            | (Submitted, Rejected)
            | (Rejected, Selecting)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: SubmissionState,
    pub to: SubmissionState,
    /// Submission number at the time of transition (0 before the first one).
    pub attempt: u32,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: SubmissionState,
    pub to: SubmissionState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal submission transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current state and the transition log of one loop run.
#[derive(Debug)]
pub struct SubmissionMachine {
    current: SubmissionState,
    attempt: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl SubmissionMachine {
    /// Create a new machine in the `Selecting` state.
    pub fn new() -> Self {
        Self {
            current: SubmissionState::Selecting,
            attempt: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    /// Get the current state.
    pub fn current(&self) -> SubmissionState {
        self.current
    }

    /// Get the current submission number (0 before the first one).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Set the submission number recorded on subsequent transitions.
    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    /// Attempt to move to `to`, recording the transition if legal.
    pub fn advance(
        &mut self,
        to: SubmissionState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        debug!(from = %self.current, to = %to, attempt = self.attempt, "Submission transition");
        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            attempt: self.attempt,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Move to `Failed` from any non-terminal state.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(SubmissionState::Failed, Some(reason))
    }

    /// Check if the machine is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Get the full transition history.
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Consume the machine, returning its transition history.
    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }
}

impl Default for SubmissionMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// One submission and the endpoint's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub answer: String,
    pub accepted: bool,
    pub message: String,
}

/// Result of a loop run, including everything needed for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    /// The accepted answer, if any.
    pub accepted: Option<String>,
    pub receipt: Option<SubmissionReceipt>,
    #[serde(serialize_with = "serialize_failure")]
    pub failure: Option<LocatorError>,
    pub attempts: Vec<AttemptRecord>,
    /// Rejected answers, never resubmitted.
    pub excluded: BTreeSet<String>,
    pub transitions: Vec<TransitionRecord>,
}

impl SubmissionReport {
    pub fn is_accepted(&self) -> bool {
        self.accepted.is_some()
    }

    pub fn submissions(&self) -> u32 {
        self.attempts.len() as u32
    }
}

fn serialize_failure<S: Serializer>(
    failure: &Option<LocatorError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match failure {
        Some(err) => serializer.serialize_some(&err.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Drives the resolver and the endpoint until acceptance or failure.
pub struct SubmissionLoop {
    resolver: Arc<dyn CandidateResolver>,
    endpoint: Arc<dyn SubmissionEndpoint>,
    max_attempts: u32,
}

impl SubmissionLoop {
    pub fn new(
        resolver: Arc<dyn CandidateResolver>,
        endpoint: Arc<dyn SubmissionEndpoint>,
        max_attempts: u32,
    ) -> Self {
        Self {
            resolver,
            endpoint,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn run(&self, note: &str, search: &SearchOutcome) -> SubmissionReport {
        let mut machine = SubmissionMachine::new();
        let mut excluded: BTreeSet<String> = BTreeSet::new();
        let mut attempts: Vec<AttemptRecord> = Vec::new();

        let failure = loop {
            if attempts.len() as u32 >= self.max_attempts {
                break LocatorError::AttemptsExhausted(self.max_attempts);
            }
            if !search.candidates.is_empty()
                && search.candidates.iter().all(|c| excluded.contains(c))
            {
                break LocatorError::CandidatesExhausted(search.candidates.len());
            }

            let input = ResolverInput {
                note,
                associations: &search.associations,
                candidates: &search.candidates,
                excluded: &excluded,
            };
            let answer = match self.resolver.resolve(&input).await {
                Candidate::Place(place) if excluded.contains(&place) => {
                    warn!(place = %place, "resolver proposed an excluded candidate");
                    break LocatorError::ResolverUnknown;
                }
                Candidate::Place(place) => place,
                Candidate::Unknown => break LocatorError::ResolverUnknown,
            };

            let attempt = attempts.len() as u32 + 1;
            machine.set_attempt(attempt);
            transition(&mut machine, SubmissionState::Submitted, Some(&answer));
            info!(attempt, answer = %answer, "submitting candidate");

            match self.endpoint.submit(&answer).await {
                Ok(receipt) => {
                    transition(&mut machine, SubmissionState::Accepted, None);
                    info!(attempt, answer = %answer, message = %receipt.message, "candidate accepted");
                    attempts.push(AttemptRecord {
                        attempt,
                        answer: answer.clone(),
                        accepted: true,
                        message: receipt.message.clone(),
                    });
                    return SubmissionReport {
                        accepted: Some(answer),
                        receipt: Some(receipt),
                        failure: None,
                        attempts,
                        excluded,
                        transitions: machine.into_transitions(),
                    };
                }
                Err(err) => {
                    let message = err.to_string();
                    transition(&mut machine, SubmissionState::Rejected, Some(&message));
                    warn!(attempt, answer = %answer, error = %err, "candidate rejected, excluding");
                    attempts.push(AttemptRecord {
                        attempt,
                        answer: answer.clone(),
                        accepted: false,
                        message,
                    });
                    excluded.insert(answer);
                    transition(&mut machine, SubmissionState::Selecting, None);
                }
            }
        };

        if let Err(e) = machine.fail(&failure.to_string()) {
            warn!(error = %e, "could not record failure transition");
        }
        warn!(
            error = %failure,
            submissions = attempts.len(),
            excluded = ?excluded,
            "submission loop failed"
        );
        SubmissionReport {
            accepted: None,
            receipt: None,
            failure: Some(failure),
            attempts,
            excluded,
            transitions: machine.into_transitions(),
        }
    }
}

fn transition(machine: &mut SubmissionMachine, to: SubmissionState, reason: Option<&str>) {
    let result = machine.advance(to, reason);
    debug_assert!(result.is_ok(), "submission state machine out of sync: {result:?}");
    if let Err(e) = result {
        warn!(error = %e, "submission state machine out of sync");
    }
}
