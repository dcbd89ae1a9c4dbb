// config.rs — Governance configuration loaded from governance.toml.
//
// Every section and field is optional; anything missing takes its default.
//
// ```toml
// [validation]
// semantic_threshold = 0.85
// bias_threshold = 0.7
//
// [engine]
// decision_deadline_ms = 40
// exhaustive_warnings = true
//
// [synthesis]
// max_publications_per_window = 5
// proactive_review_secs = 900
//
// [storage]
// principles_dir = "principles"
// ledger_path = "state/rules.jsonl"
// ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use gov_policy::{EngineConfig, ValidationConfig};
use gov_synth::SynthesisConfig;

use crate::error::ServiceError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GovernanceConfig {
    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Directory of YAML principle files. Without it the service starts with
    /// no principles.
    pub principles_dir: Option<PathBuf>,

    /// Append-only rule ledger. Without it rule history is kept in memory only.
    pub ledger_path: Option<PathBuf>,

    /// JSONL log of governance events.
    pub event_log_path: Option<PathBuf>,

    /// Replaced snapshots kept for rollback.
    #[serde(default = "default_snapshot_retention")]
    pub snapshot_retention: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            principles_dir: None,
            ledger_path: None,
            event_log_path: None,
            snapshot_retention: default_snapshot_retention(),
        }
    }
}

fn default_snapshot_retention() -> usize {
    16
}

impl GovernanceConfig {
    pub fn load(path: &Path) -> Result<Self, ServiceError> {
        let content = std::fs::read_to_string(path).map_err(|source| ServiceError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ServiceError> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ServiceError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no governance config; using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }
}
