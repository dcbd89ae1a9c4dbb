// trigger.rs — Events that start a synthesis cycle, and the bounded queue
// that carries them.
//
// Submitting never blocks: when the queue is full the trigger is dropped with
// a warning. Synthesis falling behind must not slow down whoever is producing
// triggers (typically the enforcement path via feedback).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use gov_rules::FeedbackRecord;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum Trigger {
    /// Principles were added or amended.
    PrincipleUpdated { principle_ids: Vec<String> },

    /// Something changed in the operating context.
    ContextEvent {
        scope: Vec<String>,
        #[serde(default)]
        attributes: BTreeMap<String, Value>,
    },

    /// Enforcement outcomes worth reacting to.
    Feedback { records: Vec<FeedbackRecord> },

    /// A human asked for rules to be (re)generated. An empty id list means
    /// every active principle.
    HumanDirective {
        directive: String,
        #[serde(default)]
        principle_ids: Vec<String>,
    },

    /// Scheduled review of every active principle.
    ProactiveReview,
}

impl Trigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::PrincipleUpdated { .. } => "principle_updated",
            Trigger::ContextEvent { .. } => "context_event",
            Trigger::Feedback { .. } => "feedback",
            Trigger::HumanDirective { .. } => "human_directive",
            Trigger::ProactiveReview => "proactive_review",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Producer half of the trigger queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TriggerSender {
    tx: mpsc::Sender<Trigger>,
}

impl TriggerSender {
    /// Enqueue without waiting. Returns false if the trigger was dropped.
    pub fn submit(&self, trigger: Trigger) -> bool {
        match self.tx.try_send(trigger) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(trigger)) => {
                tracing::warn!(trigger = %trigger, "trigger queue full; dropping trigger");
                false
            }
            Err(mpsc::error::TrySendError::Closed(trigger)) => {
                tracing::warn!(trigger = %trigger, "trigger queue closed; dropping trigger");
                false
            }
        }
    }
}

/// A bounded trigger queue. A capacity of zero is raised to one.
pub fn trigger_queue(capacity: usize) -> (TriggerSender, mpsc::Receiver<Trigger>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (TriggerSender { tx }, rx)
}
