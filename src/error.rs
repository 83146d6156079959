// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by an object store capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("failed to list objects under '{prefix}': {message}")]
    List { prefix: String, message: String },

    #[error("failed to delete '{key}': {message}")]
    Delete { key: String, message: String },

    #[error("failed to upload '{key}': {message}")]
    Put { key: String, message: String },

    /// The store cannot be reached at all. Stops any further uploads.
    #[error("storage unreachable: {message}")]
    Connectivity { message: String },

    #[error("invalid object key '{key}'")]
    InvalidKey { key: String },
}

impl StorageError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::Connectivity { .. })
    }
}

/// A single file that could not be uploaded during a multi-file sync.
#[derive(Debug, Clone)]
pub struct TransferError {
    pub path: PathBuf,
    pub key: String,
    pub error: StorageError,
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}

#[derive(Error, Debug)]
pub enum DeployError {
    /// Missing connection property or unmet deployment precondition.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot read {}: {source}", .path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential fetch failed: {0}")]
    CredentialFetch(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{} file(s) failed to upload ({not_attempted} not attempted){}", .failed.len(), summarize(.failed))]
    Upload {
        failed: Vec<TransferError>,
        not_attempted: usize,
    },

    #[error("an existing deployment under '{prefix}' would be overwritten")]
    ExistingDeployment { prefix: String },

    #[error("action deployment failed: {0}")]
    ActionDeploy(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl DeployError {
    pub fn missing(field: &str) -> Self {
        DeployError::Config(format!("missing required property '{}'", field))
    }

    /// Whether a caller may reasonably retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeployError::CredentialFetch(_) => true,
            DeployError::Storage(e) => !matches!(e, StorageError::InvalidKey { .. }),
            DeployError::Upload { failed, .. } => failed
                .iter()
                .all(|f| !matches!(f.error, StorageError::InvalidKey { .. })),
            _ => false,
        }
    }
}

fn summarize(failed: &[TransferError]) -> String {
    match failed.first() {
        Some(first) => format!(", first: {}", first),
        None => String::new(),
    }
}
