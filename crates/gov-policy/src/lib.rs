//! # gov-policy
//!
//! Validation of candidate rules and real-time policy decisions.
//!
//! - [`ValidationPipeline`] runs candidates through SYNTAX, SEMANTIC, SAFETY,
//!   BIAS and CONFLICT tiers with early exit.
//! - [`ConflictAnalyzer`] compares a rule against the active set over a
//!   deterministic probe set.
//! - [`DecisionEngine`] evaluates proposals against the current snapshot with
//!   a per-call deadline, fail-closed timeouts and a version-keyed cache.
//!
//! The rule language, scorers and evaluation service are external and are
//! reached through the traits in [`traits`]. [`expr::ExprLanguage`] is a
//! small reference implementation of the rule-language traits.

pub mod cache;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod expr;
pub mod metrics;
pub mod mocks;
pub mod pipeline;
pub mod safety;
pub mod traits;

pub use cache::DecisionCache;
pub use conflict::{AnalysisSubject, ConflictAnalyzer, ConflictKind, ConflictReport, Severity};
pub use engine::{DecisionEngine, EngineConfig};
pub use error::{ParseError, PolicyError};
pub use expr::ExprLanguage;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use pipeline::{
    RejectionReason, ValidationConfig, ValidationPipeline, ValidationResult, ValidationTier,
};
pub use safety::{default_safety_patterns, SafetyAnalyzer, SafetyFinding, SafetyPattern};
pub use traits::{BiasScorer, PredicateEvaluator, ProbeSource, RuleParser, SemanticScorer};
