// error.rs — Error types for the policy subsystem.

use thiserror::Error;

/// Errors that can occur during validation or evaluation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// A configured safety pattern is not a valid regular expression.
    #[error("invalid safety pattern '{name}' ({pattern}): {reason}")]
    InvalidPattern {
        name: String,
        pattern: String,
        reason: String,
    },

    /// An external collaborator (scorer, evaluator) failed.
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: String,
        message: String,
    },

    /// A predicate could not be parsed by the rule language.
    #[error("predicate does not parse: {0}")]
    Parse(#[from] ParseError),

    /// An engine metric could not be created or registered.
    #[error("metrics setup failed: {0}")]
    Metrics(String),
}

impl From<prometheus::Error> for PolicyError {
    fn from(e: prometheus::Error) -> Self {
        PolicyError::Metrics(e.to_string())
    }
}

impl PolicyError {
    pub fn collaborator(collaborator: &str, message: impl Into<String>) -> Self {
        PolicyError::Collaborator {
            collaborator: collaborator.to_string(),
            message: message.into(),
        }
    }
}

/// A syntax error reported by the rule-language parser.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} (at offset {offset})")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}
