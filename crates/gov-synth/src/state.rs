// state.rs — Synthesis cycle state machine and the report each cycle produces.
//
// One cycle moves through:
//
//   Idle → Interpreting → Generating → Validating → Published
//                                                 → AwaitingApproval
//                                                 → Deferred (rate limited)
//                                                 → Rejected
//
// Rejected is reachable from any non-terminal state: no principles in scope,
// generator exhausted, every candidate rejected, or an internal failure.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gov_policy::{ConflictReport, RejectionReason, ValidationTier};
use gov_rules::OperationalRule;

use crate::error::SynthesisError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisState {
    Idle,
    Interpreting,
    Generating,
    Validating,
    /// At least one accepted candidate needs human sign-off and nothing was published.
    AwaitingApproval,
    Published,
    /// Accepted rules are staged until the publication rate limit allows them.
    Deferred,
    Rejected,
}

impl SynthesisState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SynthesisState::AwaitingApproval
                | SynthesisState::Published
                | SynthesisState::Deferred
                | SynthesisState::Rejected
        )
    }

    pub fn can_transition_to(&self, next: &SynthesisState) -> bool {
        if *next == SynthesisState::Rejected {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (SynthesisState::Idle, SynthesisState::Interpreting)
                | (SynthesisState::Interpreting, SynthesisState::Generating)
                | (SynthesisState::Generating, SynthesisState::Validating)
                | (SynthesisState::Validating, SynthesisState::Published)
                | (SynthesisState::Validating, SynthesisState::AwaitingApproval)
                | (SynthesisState::Validating, SynthesisState::Deferred)
        )
    }
}

impl fmt::Display for SynthesisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthesisState::Idle => write!(f, "idle"),
            SynthesisState::Interpreting => write!(f, "interpreting"),
            SynthesisState::Generating => write!(f, "generating"),
            SynthesisState::Validating => write!(f, "validating"),
            SynthesisState::AwaitingApproval => write!(f, "awaiting_approval"),
            SynthesisState::Published => write!(f, "published"),
            SynthesisState::Deferred => write!(f, "deferred"),
            SynthesisState::Rejected => write!(f, "rejected"),
        }
    }
}

/// A candidate that failed validation during a cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateRejection {
    pub candidate_id: Uuid,
    pub principle_ids: Vec<String>,
    pub tier: ValidationTier,
    pub reason: RejectionReason,
}

/// A non-blocking conflict a rule was published with. The rule stays active
/// with this flag recorded until a later version or a revocation replaces it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlaggedConflict {
    pub rule_id: Uuid,
    pub rule_version: u64,
    pub report: ConflictReport,
}

/// Everything one synthesis cycle did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub trigger: String,
    pub state: SynthesisState,
    /// States visited, in order, ending with `state`.
    pub history: Vec<SynthesisState>,
    pub principles: Vec<String>,
    /// Rules that went live in this cycle.
    pub published: Vec<OperationalRule>,
    pub published_version: Option<u64>,
    /// Candidates waiting for human approval.
    pub pending_approval: Vec<Uuid>,
    pub rejections: Vec<CandidateRejection>,
    /// Medium and low severity conflicts of the rules published in this cycle.
    pub conflict_warnings: Vec<FlaggedConflict>,
    /// Candidates dropped because the candidate buffer was full.
    pub dropped_candidates: usize,
    pub generator_failures: Vec<String>,
    /// Internal failure that forced the cycle into REJECTED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CycleReport {
    pub fn new(trigger: &str) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            trigger: trigger.to_string(),
            state: SynthesisState::Idle,
            history: vec![SynthesisState::Idle],
            principles: Vec::new(),
            published: Vec::new(),
            published_version: None,
            pending_approval: Vec::new(),
            rejections: Vec::new(),
            conflict_warnings: Vec::new(),
            dropped_candidates: 0,
            generator_failures: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: SynthesisState) -> Result<(), SynthesisError> {
        if !self.state.can_transition_to(&next) {
            return Err(SynthesisError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.history.push(next);
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// End the cycle in REJECTED after an internal failure.
    pub fn abort(&mut self, error: &SynthesisError) {
        self.error = Some(error.to_string());
        if !self.state.is_terminal() {
            self.state = SynthesisState::Rejected;
            self.history.push(SynthesisState::Rejected);
        }
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut report = CycleReport::new("proactive_review");
        for next in [
            SynthesisState::Interpreting,
            SynthesisState::Generating,
            SynthesisState::Validating,
            SynthesisState::Published,
        ] {
            report.transition(next).unwrap();
        }
        assert_eq!(report.state, SynthesisState::Published);
        assert_eq!(report.history.len(), 5);
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn rejected_reachable_from_any_non_terminal_state() {
        for state in [
            SynthesisState::Idle,
            SynthesisState::Interpreting,
            SynthesisState::Generating,
            SynthesisState::Validating,
        ] {
            assert!(state.can_transition_to(&SynthesisState::Rejected));
        }
        assert!(!SynthesisState::Published.can_transition_to(&SynthesisState::Rejected));
    }

    #[test]
    fn cannot_skip_validation() {
        let mut report = CycleReport::new("feedback");
        report.transition(SynthesisState::Interpreting).unwrap();
        report.transition(SynthesisState::Generating).unwrap();
        assert!(matches!(
            report.transition(SynthesisState::Published),
            Err(SynthesisError::InvalidTransition { .. })
        ));
        assert_eq!(report.state, SynthesisState::Generating);
    }

    #[test]
    fn abort_forces_rejected() {
        let mut report = CycleReport::new("feedback");
        report.transition(SynthesisState::Interpreting).unwrap();
        report.abort(&SynthesisError::UnknownSnapshot(7));
        assert_eq!(report.state, SynthesisState::Rejected);
        assert!(report.error.as_deref().unwrap().contains('7'));
    }
}
