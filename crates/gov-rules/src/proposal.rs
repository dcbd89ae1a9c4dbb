// proposal.rs — Runtime action proposals and the decisions made about them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An action a caller wants to perform, submitted for a decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub proposal_id: String,

    /// Opaque structured description of the action.
    pub action_payload: Value,

    /// Key/value attributes describing the circumstances of the action.
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl Proposal {
    pub fn new(proposal_id: impl Into<String>, action_payload: Value) -> Self {
        Self {
            proposal_id: proposal_id.into(),
            action_payload,
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Resolve a dotted field path against this proposal.
    ///
    /// - `action.a.b` walks the action payload.
    /// - `context.k.rest` starts at context attribute `k`.
    /// - A bare path is tried against the payload first, then the context.
    pub fn field(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let head = segments.next()?;
        match head {
            "action" => walk(&self.action_payload, segments),
            "context" => {
                let key = segments.next()?;
                walk(self.context.get(key)?, segments)
            }
            _ => walk(&self.action_payload, path.split('.')).or_else(|| {
                let mut segments = path.split('.');
                let key = segments.next()?;
                walk(self.context.get(key)?, segments)
            }),
        }
    }
}

fn walk<'a, 'p>(root: &'a Value, segments: impl Iterator<Item = &'p str>) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Per-rule outcome of evaluating one predicate against one proposal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Allow,
    Deny,
    Warn,
    NotApplicable,
}

impl Verdict {
    /// Whether the rule said anything about this proposal.
    pub fn applies(self) -> bool {
        self != Verdict::NotApplicable
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Allow => write!(f, "ALLOW"),
            Verdict::Deny => write!(f, "DENY"),
            Verdict::Warn => write!(f, "WARN"),
            Verdict::NotApplicable => write!(f, "NOT_APPLICABLE"),
        }
    }
}

/// Overall decision for a proposal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "ALLOW"),
            Decision::Deny => write!(f, "DENY"),
        }
    }
}

/// A rule that produced an applicable verdict for a proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggeredRule {
    pub rule_id: Uuid,
    pub rule_version: u64,
    pub priority: i64,
    pub verdict: Verdict,
    /// Set when the verdict was forced (timeout, evaluator failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Human-readable justification attached to every decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Explanation {
    /// The highest-priority DENY, most recent on ties. `None` when allowed.
    pub primary_reason: Option<TriggeredRule>,

    /// Every WARN verdict, regardless of the final decision.
    pub warnings: Vec<TriggeredRule>,

    /// `1 - warnings / total rules` over the snapshot.
    pub compliance_score: f64,

    pub summary: String,

    /// Error class when the decision was degraded by an internal failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
}

/// The full result of evaluating a proposal; this is also the cache entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    /// Hash of payload + context + snapshot version.
    pub fingerprint: String,

    pub decision: Decision,

    /// Primary reason first (when denied), then the rest in priority order.
    pub triggered_rules: Vec<TriggeredRule>,

    pub explanation: Explanation,

    pub rule_set_version: u64,

    pub computed_at: DateTime<Utc>,

    /// Rules whose predicate was actually evaluated.
    pub rules_evaluated: usize,

    /// Rules skipped by priority short-circuiting.
    pub rules_skipped: usize,
}

impl DecisionRecord {
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }

    /// The triggered rule that decided the outcome, if denied.
    pub fn primary(&self) -> Option<&TriggeredRule> {
        self.explanation.primary_reason.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn proposal() -> Proposal {
        Proposal::new("p-1", json!({"type": "transfer", "amount": 500, "meta": {"channel": "api"}}))
            .with_context("region", json!("eu"))
            .with_context("actor", json!({"role": "clerk"}))
    }

    #[test]
    fn field_resolves_action_paths() {
        let p = proposal();
        assert_eq!(p.field("action.type"), Some(&json!("transfer")));
        assert_eq!(p.field("action.meta.channel"), Some(&json!("api")));
    }

    #[test]
    fn field_resolves_context_paths() {
        let p = proposal();
        assert_eq!(p.field("context.region"), Some(&json!("eu")));
        assert_eq!(p.field("context.actor.role"), Some(&json!("clerk")));
    }

    #[test]
    fn bare_field_prefers_payload_then_context() {
        let p = proposal();
        assert_eq!(p.field("amount"), Some(&json!(500)));
        assert_eq!(p.field("region"), Some(&json!("eu")));
        assert_eq!(p.field("missing"), None);
    }

    #[test]
    fn verdict_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_string(&Verdict::NotApplicable).unwrap(),
            "\"NOT_APPLICABLE\""
        );
        assert_eq!(serde_json::to_string(&Decision::Deny).unwrap(), "\"DENY\"");
    }
}
