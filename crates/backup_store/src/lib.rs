//! Append-only store of pre-overwrite file copies.
//!
//! Every backup is a plain file named `<sanitized source>_<YYYYMMDD_HHMMSS>`,
//! optionally suffixed with `-N` when several backups of one source land in
//! the same second. Backups are never rewritten or deleted by this crate.

mod error;
mod paths;
mod store;

pub use error::BackupStoreError;
pub use paths::{backup_file_name, parse_backup_name, sanitize_source_for_filename};
pub use store::{Backup, BackupStore};
