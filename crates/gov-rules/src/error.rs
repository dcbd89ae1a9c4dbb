// error.rs — Error types for rules, snapshots, principles and the rule ledger.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building, publishing or persisting rule state.
#[derive(Debug, Error)]
pub enum RuleSetError {
    /// A snapshot failed its internal consistency check and must not be served.
    #[error("snapshot v{version} is corrupt: {detail}")]
    SnapshotCorruption { version: u64, detail: String },

    /// A snapshot was published with a version that does not advance the current one.
    #[error("snapshot v{proposed} does not advance current version v{current}")]
    StaleVersion { current: u64, proposed: u64 },

    /// A file or directory could not be read or written.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write an entry to the rule ledger.
    #[error("failed to append ledger entry: {0}")]
    WriteFailed(#[from] std::io::Error),

    /// Failed to serialize or deserialize JSON.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A principle file is not valid YAML for a [`crate::Principle`].
    #[error("invalid principle file {path}: {source}")]
    PrincipleParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// Two principle files declare the same id.
    #[error("duplicate principle id '{0}'")]
    DuplicatePrinciple(String),

    /// The rule ledger has been tampered with; the hash chain is broken.
    #[error("ledger integrity check failed at line {line}: expected hash {expected}, got {actual}")]
    IntegrityViolation {
        line: usize,
        expected: String,
        actual: String,
    },
}
