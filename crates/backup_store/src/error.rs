use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupStoreError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid backup name '{name}': must be a bare file name")]
    InvalidBackupName { name: String },

    #[error("backup '{name}' not found under {root}")]
    NotFound { name: String, root: PathBuf },

    #[error("could not allocate a unique backup name for {source_display} under {root}")]
    NameExhausted { source_display: String, root: PathBuf },

    #[error("failed to format backup timestamp: {0}")]
    ClockFormat(#[source] time::error::Format),
}

impl BackupStoreError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
