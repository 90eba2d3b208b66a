//! Error types for backup operations.
//!
//! Per-entry scan failures and a missing `du` are recovered where they happen and
//! never show up here. Everything in this enum aborts the current invocation.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Claude projects directory not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("State file is malformed: {}: {source}", .path.display())]
    MalformedState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write archive {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Command failed: {command}: {details}")]
    CommandFailed { command: String, details: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

impl BackupError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        BackupError::Io {
            context: context.into(),
            source,
        }
    }
}
