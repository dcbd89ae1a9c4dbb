// conflict.rs — Detects candidates that contradict or undercut active rules.
//
// Both predicates are evaluated over the same deterministic probe set. Where
// both apply and their verdicts differ, the pair overlaps in a conflicting
// way; priorities then decide how bad that is.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gov_rules::{CandidateRule, OperationalRule, Proposal, Verdict};

use crate::traits::{PredicateEvaluator, ProbeSource};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    /// ALLOW against DENY on the same proposals.
    Contradiction,
    /// Same priority, different verdicts; evaluation order falls back to recency.
    AmbiguousPrecedence,
    /// A higher-priority rule denies everything the subject would allow.
    PriorityViolation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Contradiction => write!(f, "CONTRADICTION"),
            ConflictKind::AmbiguousPrecedence => write!(f, "AMBIGUOUS_PRECEDENCE"),
            ConflictKind::PriorityViolation => write!(f, "PRIORITY_VIOLATION"),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictReport {
    pub kind: ConflictKind,
    pub conflicting_rule_id: Uuid,
    pub severity: Severity,
    pub detail: String,
    /// A probe proposal on which the two rules disagree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness: Option<Proposal>,
}

impl ConflictReport {
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::High
    }
}

/// The rule being checked against the active set.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisSubject<'a> {
    pub predicate_logic: &'a str,
    pub priority: i64,
    /// An active rule the subject replaces; it is not compared against.
    pub supersedes: Option<Uuid>,
}

impl<'a> AnalysisSubject<'a> {
    pub fn candidate(
        candidate: &'a CandidateRule,
        priority: i64,
        supersedes: Option<Uuid>,
    ) -> Self {
        Self {
            predicate_logic: &candidate.predicate_logic,
            priority,
            supersedes,
        }
    }
}

impl<'a> From<&'a OperationalRule> for AnalysisSubject<'a> {
    fn from(rule: &'a OperationalRule) -> Self {
        Self {
            predicate_logic: &rule.predicate_logic,
            priority: rule.priority,
            supersedes: Some(rule.rule_id),
        }
    }
}

#[derive(Default)]
struct Overlap {
    /// First probe where both apply with different verdicts.
    differ: Option<Proposal>,
    /// First probe where one allows and the other denies.
    opposed: Option<Proposal>,
    subject_allows: usize,
    allows_denied: usize,
}

pub struct ConflictAnalyzer {
    evaluator: Arc<dyn PredicateEvaluator>,
    probes: Arc<dyn ProbeSource>,
    static_probes: Vec<Proposal>,
}

impl ConflictAnalyzer {
    pub fn new(evaluator: Arc<dyn PredicateEvaluator>, probes: Arc<dyn ProbeSource>) -> Self {
        Self {
            evaluator,
            probes,
            static_probes: Vec::new(),
        }
    }

    /// Extra proposals (e.g. recorded real traffic) to include in every comparison.
    pub fn with_static_probes(mut self, probes: Vec<Proposal>) -> Self {
        self.static_probes = probes;
        self
    }

    /// Compare `subject` with every rule in `active`, in the order given.
    ///
    /// Probes the evaluator fails on are skipped; the result depends only on
    /// the inputs.
    pub async fn analyze(
        &self,
        subject: AnalysisSubject<'_>,
        active: &[OperationalRule],
    ) -> Vec<ConflictReport> {
        let mut reports = Vec::new();

        for rule in active {
            if Some(rule.rule_id) == subject.supersedes {
                continue;
            }
            let overlap = self.overlap(subject.predicate_logic, &rule.predicate_logic).await;
            if let Some(report) = classify(&subject, rule, overlap) {
                tracing::debug!(
                    rule = %rule.label(),
                    kind = ?report.kind,
                    severity = ?report.severity,
                    "conflict detected"
                );
                reports.push(report);
            }
        }

        reports
    }

    async fn overlap(&self, subject: &str, existing: &str) -> Overlap {
        let mut probes = self.probes.probes(&[subject, existing]);
        probes.extend(self.static_probes.iter().cloned());

        let mut overlap = Overlap::default();
        for probe in probes {
            let (Ok(mine), Ok(theirs)) = (
                self.evaluator.evaluate(&probe, subject).await,
                self.evaluator.evaluate(&probe, existing).await,
            ) else {
                continue;
            };

            if mine == Verdict::Allow {
                overlap.subject_allows += 1;
                if theirs == Verdict::Deny {
                    overlap.allows_denied += 1;
                }
            }
            if mine.applies() && theirs.applies() && mine != theirs {
                if overlap.opposed.is_none() && opposed(mine, theirs) {
                    overlap.opposed = Some(probe.clone());
                }
                if overlap.differ.is_none() {
                    overlap.differ = Some(probe);
                }
            }
        }
        overlap
    }
}

fn opposed(a: Verdict, b: Verdict) -> bool {
    matches!(
        (a, b),
        (Verdict::Allow, Verdict::Deny) | (Verdict::Deny, Verdict::Allow)
    )
}

fn classify(
    subject: &AnalysisSubject<'_>,
    rule: &OperationalRule,
    overlap: Overlap,
) -> Option<ConflictReport> {
    let report = |kind, severity, detail: String, witness| ConflictReport {
        kind,
        conflicting_rule_id: rule.rule_id,
        severity,
        detail,
        witness,
    };

    if rule.priority > subject.priority
        && overlap.subject_allows > 0
        && overlap.allows_denied == overlap.subject_allows
    {
        return Some(report(
            ConflictKind::PriorityViolation,
            Severity::High,
            format!(
                "higher-priority rule {} (priority {}) denies every proposal this rule allows",
                rule.label(),
                rule.priority
            ),
            overlap.opposed,
        ));
    }

    if let Some(witness) = overlap.opposed {
        let severity = if rule.priority >= subject.priority {
            Severity::High
        } else {
            Severity::Low
        };
        return Some(report(
            ConflictKind::Contradiction,
            severity,
            format!(
                "opposite verdict to {} (priority {} vs {})",
                rule.label(),
                rule.priority,
                subject.priority
            ),
            Some(witness),
        ));
    }

    match overlap.differ {
        Some(witness) if rule.priority == subject.priority => Some(report(
            ConflictKind::AmbiguousPrecedence,
            Severity::Medium,
            format!(
                "different verdict from {} at the same priority {}",
                rule.label(),
                rule.priority
            ),
            Some(witness),
        )),
        _ => None,
    }
}
