// approvals.rs — Accepted candidates held for human sign-off.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gov_policy::ConflictReport;
use gov_rules::{CandidateRule, OperationalRule, Principle};

/// Why a candidate cannot publish on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ApprovalReason {
    LowConfidence { confidence: f64, gate: f64 },
    CriticalPrinciple { principle_id: String },
}

/// Decide whether `candidate` needs a human. A critical principle wins over
/// low confidence so the reason names the principle.
pub fn requires_approval(
    candidate: &CandidateRule,
    principles: &[Principle],
    gate: f64,
) -> Option<ApprovalReason> {
    let key = candidate.derivation_key();
    if let Some(critical) = principles
        .iter()
        .find(|p| p.critical && key.contains(&p.id))
    {
        return Some(ApprovalReason::CriticalPrinciple {
            principle_id: critical.id.clone(),
        });
    }
    if candidate.confidence < gate {
        return Some(ApprovalReason::LowConfidence {
            confidence: candidate.confidence,
            gate,
        });
    }
    None
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingApproval {
    pub candidate: CandidateRule,
    /// The rule as validated when it was queued.
    pub rule: OperationalRule,
    pub warnings: Vec<ConflictReport>,
    pub reason: ApprovalReason,
    pub requested_at: DateTime<Utc>,
}

/// Pending approvals keyed by candidate id, at most one per derivation key.
#[derive(Debug)]
pub struct PendingApprovals {
    entries: BTreeMap<Uuid, PendingApproval>,
    capacity: usize,
}

impl Default for PendingApprovals {
    fn default() -> Self {
        Self::with_capacity(usize::MAX)
    }
}

impl PendingApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Queue `pending`. A request for the same principles is replaced, and
    /// when the queue is full the oldest request is evicted. Returns whatever
    /// left the queue.
    pub fn insert(&mut self, pending: PendingApproval) -> Vec<PendingApproval> {
        let key = pending.candidate.derivation_key();
        let replaced: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|(_, p)| p.candidate.derivation_key() == key)
            .map(|(id, _)| *id)
            .collect();
        let mut displaced: Vec<PendingApproval> = replaced
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect();

        while self.entries.len() >= self.capacity {
            let Some(oldest) = self
                .entries
                .values()
                .min_by_key(|p| p.requested_at)
                .map(|p| p.candidate.candidate_id)
            else {
                break;
            };
            displaced.extend(self.entries.remove(&oldest));
        }

        self.entries.insert(pending.candidate.candidate_id, pending);
        displaced
    }

    pub fn take(&mut self, candidate_id: Uuid) -> Option<PendingApproval> {
        self.entries.remove(&candidate_id)
    }

    pub fn get(&self, candidate_id: Uuid) -> Option<&PendingApproval> {
        self.entries.get(&candidate_id)
    }

    /// Oldest request first.
    pub fn list(&self) -> Vec<PendingApproval> {
        let mut all: Vec<PendingApproval> = self.entries.values().cloned().collect();
        all.sort_by_key(|p| p.requested_at);
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
