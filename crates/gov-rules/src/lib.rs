//! # gov-rules
//!
//! Data model for the governed policy loop: principles go in, versioned
//! operational rules come out, and the decision engine reads them through an
//! immutable [`RuleSetSnapshot`].
//!
//! ## Key invariants
//!
//! - **Snapshots are immutable**: a [`RuleSetSnapshot`] is sorted by
//!   priority-then-recency on construction and verified before it can become
//!   current. A snapshot that fails [`RuleSetSnapshot::verify`] is never
//!   published; the [`ActiveRuleSet`] keeps serving the last good one.
//! - **Single pointer swap**: readers clone an `Arc` to the current snapshot
//!   and keep it for the duration of a decision, so a concurrent publish never
//!   produces a partial read.
//! - **Rules are never deleted**: supersession creates a new version of the
//!   same `rule_id`; the [`RuleLedger`] keeps an append-only, hash-chained
//!   history of every lifecycle change.
//! - **Fingerprints include the snapshot version**: a cached decision can
//!   only be found again under the snapshot it was computed against.

pub mod error;
pub mod feedback;
pub mod hasher;
pub mod ledger;
pub mod principle;
pub mod proposal;
pub mod rule;
pub mod ruleset;
pub mod snapshot;

pub use error::RuleSetError;
pub use feedback::{EnforcementOutcome, FeedbackRecord, FeedbackSink};
pub use ledger::{LedgerAction, LedgerEntry, RuleLedger};
pub use principle::{InMemoryPrincipleStore, Principle, PrincipleStore};
pub use proposal::{Decision, DecisionRecord, Explanation, Proposal, TriggeredRule, Verdict};
pub use rule::{derivation_key, CandidateRule, OperationalRule, RuleStatus};
pub use ruleset::ActiveRuleSet;
pub use snapshot::RuleSetSnapshot;
