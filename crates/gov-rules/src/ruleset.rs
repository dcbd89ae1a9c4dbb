// ruleset.rs — The Active Rule Set: one current snapshot, swapped atomically.
//
// Readers call `current()` once per decision and hold the returned Arc until
// they are done, so a publish that happens mid-decision is invisible to them.
// The read lock is held only long enough to clone the Arc.
//
// There is a single writer (the rule synthesizer, serialized by its owner).
// `publish` verifies the incoming snapshot first; a snapshot that fails the
// consistency check is refused and the last known-good snapshot keeps being
// served. Replaced snapshots are retained for a while for audit and rollback.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::RuleSetError;
use crate::snapshot::RuleSetSnapshot;

/// Default number of replaced snapshots kept for rollback.
const DEFAULT_RETAINED: usize = 16;

pub struct ActiveRuleSet {
    current: RwLock<Arc<RuleSetSnapshot>>,
    retained: Mutex<VecDeque<Arc<RuleSetSnapshot>>>,
    retain_limit: usize,
}

impl ActiveRuleSet {
    /// Start from the empty version-0 snapshot.
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETAINED)
    }

    pub fn with_retention(retain_limit: usize) -> Self {
        Self {
            current: RwLock::new(Arc::new(RuleSetSnapshot::empty())),
            retained: Mutex::new(VecDeque::new()),
            retain_limit,
        }
    }

    /// The snapshot to evaluate against. Never blocks on a writer for longer
    /// than a pointer swap.
    pub fn current(&self) -> Arc<RuleSetSnapshot> {
        // The guarded value is only ever replaced whole, so a poisoned lock
        // still holds a complete snapshot.
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn version(&self) -> u64 {
        self.current().version()
    }

    /// Verify and install `next` as the current snapshot.
    pub fn publish(&self, next: RuleSetSnapshot) -> Result<Arc<RuleSetSnapshot>, RuleSetError> {
        if let Err(e) = next.verify() {
            tracing::error!(
                version = next.version(),
                error = %e,
                "refusing corrupt snapshot; keeping last known-good"
            );
            return Err(e);
        }

        let next = Arc::new(next);
        let previous = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if next.version() <= current.version() {
                return Err(RuleSetError::StaleVersion {
                    current: current.version(),
                    proposed: next.version(),
                });
            }
            std::mem::replace(&mut *current, Arc::clone(&next))
        };

        tracing::info!(
            from = previous.version(),
            to = next.version(),
            rules = next.len(),
            "published rule-set snapshot"
        );

        let mut retained = self.retained.lock().unwrap_or_else(PoisonError::into_inner);
        retained.push_back(previous);
        while retained.len() > self.retain_limit {
            retained.pop_front();
        }

        Ok(next)
    }

    /// A snapshot by version: the current one or a retained predecessor.
    pub fn snapshot(&self, version: u64) -> Option<Arc<RuleSetSnapshot>> {
        let current = self.current();
        if current.version() == version {
            return Some(current);
        }
        self.retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| s.version() == version)
            .cloned()
    }

    /// Versions of retained (no longer current) snapshots, oldest first.
    pub fn retained_versions(&self) -> Vec<u64> {
        self.retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| s.version())
            .collect()
    }
}

impl Default for ActiveRuleSet {
    fn default() -> Self {
        Self::new()
    }
}
