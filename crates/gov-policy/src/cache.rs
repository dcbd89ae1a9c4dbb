// cache.rs — Bounded decision cache keyed by version-inclusive fingerprints.
//
// Fingerprints already include the snapshot version, so entries from an old
// snapshot are unreachable by construction. `get` still compares the stored
// record's version against the caller's and drops mismatches, and eviction
// (LRU by access tick, plus TTL) keeps memory bounded.
//
// Concurrent misses for the same fingerprint may both insert; the last write
// wins, which is fine because the records are identical.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use gov_rules::DecisionRecord;

struct Entry {
    record: DecisionRecord,
    inserted_at: Instant,
    tick: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Access tick -> fingerprint; the first key is the least recently used.
    recency: BTreeMap<u64, String>,
    next_tick: u64,
}

impl Inner {
    fn touch(&mut self, fingerprint: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.entries.get_mut(fingerprint) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, fingerprint.to_string());
        }
    }

    fn remove(&mut self, fingerprint: &str) {
        if let Some(entry) = self.entries.remove(fingerprint) {
            self.recency.remove(&entry.tick);
        }
    }

    fn evict_lru(&mut self) {
        if let Some((_, fingerprint)) = self.recency.pop_first() {
            self.entries.remove(&fingerprint);
        }
    }
}

pub struct DecisionCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Duration,
}

impl DecisionCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity,
            ttl,
        }
    }

    /// The cached record for `fingerprint`, if it was computed against
    /// `current_version` and has not expired.
    pub fn get(&self, fingerprint: &str, current_version: u64) -> Option<DecisionRecord> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = inner.entries.get(fingerprint)?;

        if entry.record.rule_set_version != current_version
            || entry.inserted_at.elapsed() >= self.ttl
        {
            inner.remove(fingerprint);
            return None;
        }

        let record = entry.record.clone();
        inner.touch(fingerprint);
        Some(record)
    }

    pub fn insert(&self, record: DecisionRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let fingerprint = record.fingerprint.clone();
        inner.remove(&fingerprint);
        while inner.entries.len() >= self.capacity {
            inner.evict_lru();
        }

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.recency.insert(tick, fingerprint.clone());
        inner.entries.insert(
            fingerprint,
            Entry {
                record,
                inserted_at: Instant::now(),
                tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Inner::default();
    }
}
