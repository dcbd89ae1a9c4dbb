// events.rs — Governance lifecycle events and their sinks.
//
// The synthesizer emits an event whenever a candidate is rejected or parked
// for approval, a snapshot goes live (with any conflicts it carries), a rule
// is revoked, or a cycle ends.
// Sinks (JSONL log, in-memory buffer, anything downstream) subscribe through
// the dispatcher. A failing sink is logged and skipped; it never stops a
// synthesis cycle.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gov_policy::{ConflictKind, Severity, ValidationTier};

use crate::error::SynthesisError;
use crate::state::{FlaggedConflict, SynthesisState};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GovEvent {
    /// A candidate failed a validation tier.
    CandidateRejected {
        cycle_id: Uuid,
        candidate_id: Uuid,
        tier: ValidationTier,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A validated candidate is waiting for a human.
    ApprovalRequested {
        candidate_id: Uuid,
        principle_ids: Vec<String>,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A human rejected a pending candidate, or re-validation at approval failed.
    ApprovalDenied {
        candidate_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The active rule set was swapped.
    SnapshotPublished {
        from_version: u64,
        to_version: u64,
        rule_ids: Vec<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// A published rule carries an unresolved, non-blocking conflict.
    ConflictFlagged {
        rule_id: Uuid,
        rule_version: u64,
        conflicting_rule_id: Uuid,
        kind: ConflictKind,
        severity: Severity,
        detail: String,
        snapshot_version: u64,
        timestamp: DateTime<Utc>,
    },

    RuleRevoked {
        rule_id: Uuid,
        rule_version: u64,
        snapshot_version: u64,
        timestamp: DateTime<Utc>,
    },

    CycleFinished {
        cycle_id: Uuid,
        trigger: String,
        state: SynthesisState,
        timestamp: DateTime<Utc>,
    },
}

impl GovEvent {
    pub fn event_type(&self) -> &str {
        match self {
            GovEvent::CandidateRejected { .. } => "candidate_rejected",
            GovEvent::ApprovalRequested { .. } => "approval_requested",
            GovEvent::ApprovalDenied { .. } => "approval_denied",
            GovEvent::SnapshotPublished { .. } => "snapshot_published",
            GovEvent::ConflictFlagged { .. } => "conflict_flagged",
            GovEvent::RuleRevoked { .. } => "rule_revoked",
            GovEvent::CycleFinished { .. } => "cycle_finished",
        }
    }

    pub fn candidate_rejected(
        cycle_id: Uuid,
        candidate_id: Uuid,
        tier: ValidationTier,
        reason: impl ToString,
    ) -> Self {
        GovEvent::CandidateRejected {
            cycle_id,
            candidate_id,
            tier,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn snapshot_published(from_version: u64, to_version: u64, rule_ids: Vec<Uuid>) -> Self {
        GovEvent::SnapshotPublished {
            from_version,
            to_version,
            rule_ids,
            timestamp: Utc::now(),
        }
    }

    pub fn conflict_flagged(flagged: &FlaggedConflict, snapshot_version: u64) -> Self {
        GovEvent::ConflictFlagged {
            rule_id: flagged.rule_id,
            rule_version: flagged.rule_version,
            conflicting_rule_id: flagged.report.conflicting_rule_id,
            kind: flagged.report.kind,
            severity: flagged.report.severity,
            detail: flagged.report.detail.clone(),
            snapshot_version,
            timestamp: Utc::now(),
        }
    }

    pub fn cycle_finished(cycle_id: Uuid, trigger: &str, state: SynthesisState) -> Self {
        GovEvent::CycleFinished {
            cycle_id,
            trigger: trigger.to_string(),
            state,
            timestamp: Utc::now(),
        }
    }
}

/// Receives governance events.
pub trait EventSink: Send + Sync {
    /// Errors are logged by the dispatcher and otherwise ignored.
    fn send(&self, event: &GovEvent) -> Result<(), SynthesisError>;
}

impl<T: EventSink + ?Sized> EventSink for std::sync::Arc<T> {
    fn send(&self, event: &GovEvent) -> Result<(), SynthesisError> {
        (**self).send(event)
    }
}

/// Appends events as JSONL.
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl EventSink for LogSink {
    fn send(&self, event: &GovEvent) -> Result<(), SynthesisError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| SynthesisError::IoError {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| SynthesisError::IoError {
                path: self.path.display().to_string(),
                source,
            })?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json).map_err(|source| SynthesisError::IoError {
            path: self.path.display().to_string(),
            source,
        })?;

        Ok(())
    }
}

/// Keeps events in memory. Used by tests and by callers that poll.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<GovEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GovEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Event type names, in dispatch order.
    pub fn event_types(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }
}

impl EventSink for MemorySink {
    fn send(&self, event: &GovEvent) -> Result<(), SynthesisError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Fans events out to every sink.
#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Box<dyn EventSink>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn dispatch(&self, event: &GovEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(event) {
                tracing::warn!(event_type = event.event_type(), "event sink error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn event_type_matches_serde_tag() {
        let event = GovEvent::snapshot_published(1, 2, vec![Uuid::new_v4()]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], event.event_type());
    }

    #[test]
    fn log_sink_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");
        let sink = LogSink::new(&path);

        sink.send(&GovEvent::snapshot_published(0, 1, vec![])).unwrap();
        sink.send(&GovEvent::cycle_finished(
            Uuid::new_v4(),
            "proactive_review",
            SynthesisState::Published,
        ))
        .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let restored: GovEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(restored.event_type(), "cycle_finished");
    }

    #[test]
    fn failing_sink_does_not_block_others() {
        let dir = tempdir().unwrap();
        // A directory path cannot be opened for appending.
        let broken = LogSink::new(dir.path());
        let memory = Arc::new(MemorySink::new());

        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(broken));
        dispatcher.add_sink(Box::new(memory.clone()));
        dispatcher.dispatch(&GovEvent::snapshot_published(1, 2, vec![]));

        assert_eq!(memory.event_types(), vec!["snapshot_published".to_string()]);
    }
}
