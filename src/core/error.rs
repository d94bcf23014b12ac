//! Crate error type.
//!
//! Every failure in the binder is deterministic, so nothing here is retried.
//! The enum is `Clone` because a lazily resolved template memoizes its failure
//! and hands the same error back on every access.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced while parsing, binding, or rendering an organization template.
#[derive(Debug, Clone, Error)]
pub enum OrgError {
    /// A logical account reference has no persisted physical binding.
    #[error("UnknownAccount: account '{logical_id}' has no persisted physical binding")]
    UnknownAccount { logical_id: String },

    /// A resource resolves to an empty target set, or a required default is missing.
    #[error("ConfigurationError: {0}")]
    Configuration(String),

    /// A value cannot be represented in the output template.
    #[error("SerializationError: {0}")]
    Serialization(String),

    /// The template document is not valid YAML or has the wrong shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failed; one message per problem.
    #[error("{} validation error(s): {}", .0.len(), .0.join("; "))]
    Validation(Vec<String>),

    /// The state file could not be decoded or encoded.
    #[error("state error: {0}")]
    State(String),

    /// Reading or writing a file failed.
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl OrgError {
    pub(crate) fn unknown_account(logical_id: impl Into<String>) -> Self {
        Self::UnknownAccount {
            logical_id: logical_id.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, OrgError>;
