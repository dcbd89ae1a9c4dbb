// feedback.rs — Enforcement outcomes streamed back to rule synthesis.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened when a rule took part in a decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnforcementOutcome {
    /// The rule was the primary reason for a DENY.
    Denied,
    /// The rule issued a WARN.
    Warned,
    /// The rule's predicate timed out or failed and was forced to DENY.
    EvaluationFailed { error_class: String },
    /// A human reported that the rule's decision was wrong.
    Disputed { note: String },
}

impl fmt::Display for EnforcementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforcementOutcome::Denied => write!(f, "denied"),
            EnforcementOutcome::Warned => write!(f, "warned"),
            EnforcementOutcome::EvaluationFailed { .. } => write!(f, "evaluation_failed"),
            EnforcementOutcome::Disputed { .. } => write!(f, "disputed"),
        }
    }
}

/// One `{rule_id, outcome, timestamp}` tuple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedbackRecord {
    pub rule_id: Uuid,
    pub outcome: EnforcementOutcome,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn new(rule_id: Uuid, outcome: EnforcementOutcome) -> Self {
        Self {
            rule_id,
            outcome,
            timestamp: Utc::now(),
        }
    }
}

/// Write-only destination for enforcement feedback.
///
/// Called on the decision hot path, so implementations must not block.
pub trait FeedbackSink: Send + Sync {
    fn record(&self, feedback: FeedbackRecord);
}
