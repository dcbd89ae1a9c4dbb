// rule.rs — Candidate rules and versioned operational rules.
//
// A CandidateRule is the transient output of the generator; it only lives
// while the validation pipeline looks at it. An OperationalRule is what the
// decision engine enforces. Operational rules are never edited in place:
// superseding a rule creates a new version under the same `rule_id`.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical form of a principle id list: sorted and deduplicated.
///
/// Two rules with the same derivation key are derived from the same set of
/// principles, so a new one supersedes the old one.
pub fn derivation_key(principle_ids: &[String]) -> Vec<String> {
    let unique: BTreeSet<&String> = principle_ids.iter().collect();
    unique.into_iter().cloned().collect()
}

/// A generated rule awaiting validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateRule {
    /// Handle used by the human approval gate.
    pub candidate_id: Uuid,

    /// Principles this rule claims to implement. Must be non-empty.
    pub source_principle_ids: Vec<String>,

    /// Predicate in the external rule language.
    pub predicate_logic: String,

    /// Why the generator believes this rule implements its principles.
    pub explanation: String,

    /// Generator confidence in [0.0, 1.0].
    pub confidence: f64,

    #[serde(default)]
    pub context_tags: BTreeSet<String>,

    /// Explicit priority; when absent the rule inherits the highest priority
    /// among its source principles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_override: Option<i64>,
}

impl CandidateRule {
    pub fn new(
        source_principle_ids: Vec<String>,
        predicate_logic: impl Into<String>,
        explanation: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            candidate_id: Uuid::new_v4(),
            source_principle_ids,
            predicate_logic: predicate_logic.into(),
            explanation: explanation.into(),
            confidence,
            context_tags: BTreeSet::new(),
            priority_override: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority_override(mut self, priority: i64) -> Self {
        self.priority_override = Some(priority);
        self
    }

    pub fn derivation_key(&self) -> Vec<String> {
        derivation_key(&self.source_principle_ids)
    }
}

/// Lifecycle status of an operational rule version.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Active,
    Superseded,
    Revoked,
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleStatus::Active => write!(f, "active"),
            RuleStatus::Superseded => write!(f, "superseded"),
            RuleStatus::Revoked => write!(f, "revoked"),
        }
    }
}

/// A validated, enforceable rule version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationalRule {
    /// Stable identity across versions.
    pub rule_id: Uuid,

    /// Monotonic per `rule_id`, starting at 1.
    pub version: u64,

    pub source_principle_ids: Vec<String>,

    pub predicate_logic: String,

    pub explanation: String,

    pub priority: i64,

    pub status: RuleStatus,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub context_tags: BTreeSet<String>,
}

impl OperationalRule {
    /// Package an accepted candidate.
    ///
    /// With no prior rule this is version 1 under a fresh `rule_id`; otherwise
    /// it is the next version of the prior rule.
    pub fn from_candidate(
        candidate: &CandidateRule,
        priority: i64,
        prior: Option<&OperationalRule>,
    ) -> Self {
        let (rule_id, version) = match prior {
            Some(prior) => (prior.rule_id, prior.version + 1),
            None => (Uuid::new_v4(), 1),
        };
        Self {
            rule_id,
            version,
            source_principle_ids: candidate.derivation_key(),
            predicate_logic: candidate.predicate_logic.clone(),
            explanation: candidate.explanation.clone(),
            priority,
            status: RuleStatus::Active,
            created_at: Utc::now(),
            context_tags: candidate.context_tags.clone(),
        }
    }

    /// A copy of this version carrying a different lifecycle status.
    pub fn with_status(&self, status: RuleStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    pub fn derivation_key(&self) -> Vec<String> {
        derivation_key(&self.source_principle_ids)
    }

    /// `rule_id@version`, used in logs and explanations.
    pub fn label(&self) -> String {
        format!("{}@v{}", self.rule_id, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_key_sorts_and_dedups() {
        let ids = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(derivation_key(&ids), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn first_version_gets_fresh_id() {
        let candidate = CandidateRule::new(vec!["p1".into()], "deny always", "x", 0.9);
        let rule = OperationalRule::from_candidate(&candidate, 7, None);
        assert_eq!(rule.version, 1);
        assert_eq!(rule.priority, 7);
        assert!(rule.is_active());
    }

    #[test]
    fn superseding_keeps_id_and_bumps_version() {
        let candidate = CandidateRule::new(vec!["p1".into()], "deny if amount > 5", "x", 0.9);
        let first = OperationalRule::from_candidate(&candidate, 7, None);
        let second = OperationalRule::from_candidate(&candidate, 7, Some(&first));
        assert_eq!(second.rule_id, first.rule_id);
        assert_eq!(second.version, 2);
    }

    #[test]
    fn with_status_leaves_original_untouched() {
        let candidate = CandidateRule::new(vec!["p1".into()], "warn if amount > 5", "x", 0.9);
        let rule = OperationalRule::from_candidate(&candidate, 1, None);
        let revoked = rule.with_status(RuleStatus::Revoked);
        assert!(rule.is_active());
        assert_eq!(revoked.status, RuleStatus::Revoked);
        assert_eq!(revoked.rule_id, rule.rule_id);
    }
}
