// error.rs — Error types for rule synthesis.

use thiserror::Error;
use uuid::Uuid;

use gov_policy::PolicyError;
use gov_rules::RuleSetError;

/// Errors from synthesis and rule-lifecycle operations.
///
/// Generator and validation failures are not here: they end a cycle in
/// REJECTED and are reported in its `CycleReport`.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Snapshot construction, publication or ledger I/O failed.
    #[error(transparent)]
    RuleSet(#[from] RuleSetError),

    /// Pipeline construction failed (e.g. a bad safety pattern).
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// No candidate with this id is awaiting approval.
    #[error("no pending candidate {0}")]
    UnknownCandidate(Uuid),

    /// No active rule with this id.
    #[error("no active rule {0}")]
    UnknownRule(Uuid),

    /// The snapshot version is neither current nor retained.
    #[error("snapshot version {0} is not retained")]
    UnknownSnapshot(u64),

    #[error("invalid synthesis transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// An event sink could not write.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Failure of an external rule generator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("generator {generator} unavailable: {message}")]
    Unavailable { generator: String, message: String },

    #[error("generator {generator} produced invalid output: {message}")]
    InvalidOutput { generator: String, message: String },

    /// Primary retries and the fallback all failed.
    #[error("generation failed after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: String },
}
