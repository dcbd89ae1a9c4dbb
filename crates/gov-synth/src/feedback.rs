// feedback.rs — Collects enforcement outcomes and synthesis-quality counters.
//
// The decision engine writes here on its hot path, so `record` only takes a
// short lock and never waits for the synthesizer. When the buffer is full the
// oldest record is dropped.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gov_policy::ValidationTier;
use gov_rules::{EnforcementOutcome, FeedbackRecord, FeedbackSink};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedbackStats {
    pub buffered: usize,
    pub received: u64,
    pub dropped: u64,
    /// Validation rejections per tier since startup.
    pub rejections_by_tier: BTreeMap<ValidationTier, u64>,
}

pub struct FeedbackCollector {
    capacity: usize,
    buffer: Mutex<VecDeque<FeedbackRecord>>,
    rejections: Mutex<BTreeMap<ValidationTier, u64>>,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl FeedbackCollector {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: Mutex::new(VecDeque::new()),
            rejections: Mutex::new(BTreeMap::new()),
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Take every buffered record, oldest first.
    pub fn drain(&self) -> Vec<FeedbackRecord> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Record a human dispute against a rule's decision.
    pub fn dispute(&self, rule_id: Uuid, note: &str) {
        self.record(FeedbackRecord::new(
            rule_id,
            EnforcementOutcome::Disputed {
                note: note.to_string(),
            },
        ));
    }

    pub fn record_rejection(&self, tier: ValidationTier) {
        *self
            .rejections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tier)
            .or_default() += 1;
    }

    pub fn rejection_counts(&self) -> BTreeMap<ValidationTier, u64> {
        self.rejections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> FeedbackStats {
        FeedbackStats {
            buffered: self.len(),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejections_by_tier: self.rejection_counts(),
        }
    }
}

impl FeedbackSink for FeedbackCollector {
    fn record(&self, feedback: FeedbackRecord) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped, "feedback buffer full; dropping oldest record");
        }
        buffer.push_back(feedback);
    }
}
