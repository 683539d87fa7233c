use std::path::PathBuf;

use backup_store::BackupStoreError;
use thiserror::Error;

/// Failures surfaced by the assistant core.
///
/// None of these are fatal to the session: each is reported for the turn,
/// file, or command that produced it.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("path escapes sandbox root {root}: {path}")]
    SandboxViolation { path: PathBuf, root: PathBuf },

    #[error("generation failed: {0}")]
    BackendFailure(String),

    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup store error: {0}")]
    Backup(#[from] BackupStoreError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("nothing to undo: no file has been modified in this session")]
    NothingToUndo,

    #[error("no backup found for {display}")]
    NoBackupFor { display: String },

    #[error("text not found in {display}")]
    TextNotFound { display: String },
}

impl AssistantError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn sandbox(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self::SandboxViolation {
            path: path.into(),
            root: root.into(),
        }
    }

    /// True for rejections caused by the sandbox rather than the filesystem.
    #[must_use]
    pub fn is_sandbox_violation(&self) -> bool {
        matches!(self, Self::SandboxViolation { .. })
    }
}
