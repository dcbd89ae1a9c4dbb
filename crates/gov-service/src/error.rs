// error.rs — Error types for the governance service.

use std::path::PathBuf;

use thiserror::Error;

use gov_policy::PolicyError;
use gov_rules::RuleSetError;
use gov_synth::SynthesisError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Principle loading, ledger I/O or snapshot publication failed.
    #[error(transparent)]
    RuleSet(#[from] RuleSetError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Approval, revocation or rollback failed.
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
}
