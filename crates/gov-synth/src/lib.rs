//! # gov-synth
//!
//! Turns governance principles into published operational rules.
//!
//! A [`Trigger`] (principle update, context event, enforcement feedback,
//! human directive or scheduled review) starts one synthesis cycle in the
//! [`RuleSynthesizer`]. The cycle resolves the principles in scope, asks the
//! external [`Generator`] for candidates (retrying, then falling back), runs
//! them through the validation pipeline and publishes the survivors as one new
//! rule-set snapshot. Candidates that need a human wait in the approval queue;
//! publications beyond the rate limit are staged.
//!
//! The synthesizer is the single writer of the active rule set. Every rule
//! version it creates is kept in the [`RuleRegistry`] and, optionally, the
//! hash-chained rule ledger.

pub mod approvals;
pub mod error;
pub mod events;
pub mod feedback;
pub mod generator;
pub mod limiter;
pub mod mocks;
pub mod registry;
pub mod state;
pub mod synthesizer;
pub mod trigger;

pub use approvals::{requires_approval, ApprovalReason, PendingApproval, PendingApprovals};
pub use error::{GeneratorError, SynthesisError};
pub use events::{EventDispatcher, EventSink, GovEvent, LogSink, MemorySink};
pub use feedback::{FeedbackCollector, FeedbackStats};
pub use generator::{Generator, ResilientGenerator, SynthesisContext};
pub use limiter::PublicationLimiter;
pub use registry::RuleRegistry;
pub use state::{CandidateRejection, CycleReport, FlaggedConflict, SynthesisState};
pub use synthesizer::{ApprovalOutcome, RuleSynthesizer, SynthesisConfig};
pub use trigger::{trigger_queue, Trigger, TriggerSender};
