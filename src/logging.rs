//! File-backed tracing setup and the mutation audit trail.
//!
//! Every filesystem mutation performed on behalf of the user is recorded as
//! an event on the `mlx_code::ops` target with an `operation` and a `detail`
//! field, so the log file doubles as the operation history.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::error::AssistantError;

pub const LOG_FILE_NAME: &str = "mlx-code.log";
pub const LOG_FILTER_ENV: &str = "MLX_CODE_LOG";

/// Audited mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    FileWrite,
    FileWriteError,
    BlockedWrite,
    BackupFailed,
    Restore,
    Undo,
    Replace,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileWrite => "FILE_WRITE",
            Self::FileWriteError => "FILE_WRITE_ERROR",
            Self::BlockedWrite => "BLOCKED_WRITE",
            Self::BackupFailed => "BACKUP_FAILED",
            Self::Restore => "RESTORE",
            Self::Undo => "UNDO",
            Self::Replace => "REPLACE",
        }
    }

    fn is_failure(self) -> bool {
        matches!(
            self,
            Self::FileWriteError | Self::BlockedWrite | Self::BackupFailed
        )
    }
}

/// Records one audited mutation.
pub fn log_operation(operation: Operation, detail: &str) {
    if operation.is_failure() {
        tracing::warn!(target: "mlx_code::ops", operation = operation.as_str(), detail);
    } else {
        tracing::info!(target: "mlx_code::ops", operation = operation.as_str(), detail);
    }
}

/// Installs a global subscriber appending to `<log_dir>/mlx-code.log`.
///
/// The filter comes from `MLX_CODE_LOG` (default `info`). Returns the log
/// path. A subscriber installed earlier (tests, embedding hosts) is kept.
pub fn init(log_dir: &Path) -> Result<PathBuf, AssistantError> {
    fs::create_dir_all(log_dir)
        .map_err(|source| AssistantError::io("creating log directory", log_dir, source))?;
    let path = log_dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| AssistantError::io("opening log file", &path, source))?;

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();

    Ok(path)
}
