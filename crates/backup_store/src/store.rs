use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::BackupStoreError;
use crate::paths::{backup_file_name, parse_backup_name, sanitize_source_for_filename};

/// Upper bound on same-second collisions before giving up.
const MAX_SEQUENCE: u32 = 1000;

/// One immutable backup file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    /// Bare file name inside the store.
    pub name: String,
    /// Sanitized source path the backup was taken from.
    pub source: String,
    /// `YYYYMMDD_HHMMSS` local time of creation.
    pub timestamp: String,
    pub sequence: u32,
    pub stored_path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    /// Opens (creating if needed) the store directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BackupStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|source| BackupStoreError::io("creating backup directory", &root, source))?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies `source` into the store under a name derived from `label`.
    ///
    /// Never overwrites an existing backup: colliding names get a `-N` suffix.
    pub fn create(&self, source: &Path, label: &str) -> Result<Backup, BackupStoreError> {
        let stamp = current_stamp()?;
        let mut input = File::open(source)
            .map_err(|err| BackupStoreError::io("opening file to back up", source, err))?;

        let (name, stored_path, mut output) = self.create_unique(label, &stamp)?;
        let size = match io::copy(&mut input, &mut output) {
            Ok(size) => size,
            Err(err) => {
                drop(output);
                // A half-written copy must not masquerade as a valid backup.
                let _ = fs::remove_file(&stored_path);
                return Err(BackupStoreError::io("copying backup", &stored_path, err));
            }
        };
        output
            .sync_all()
            .map_err(|err| BackupStoreError::io("syncing backup", &stored_path, err))?;

        let sequence = parse_backup_name(&name).map_or(0, |(_, _, sequence)| sequence);
        tracing::debug!(backup = %name, source = label, "created backup");

        Ok(Backup {
            source: sanitize_source_for_filename(label),
            timestamp: stamp,
            sequence,
            name,
            stored_path,
            size,
        })
    }

    fn create_unique(
        &self,
        display: &str,
        stamp: &str,
    ) -> Result<(String, PathBuf, File), BackupStoreError> {
        for sequence in 0..MAX_SEQUENCE {
            let name = backup_file_name(display, stamp, sequence);
            let path = self.root.join(&name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((name, path, file)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(BackupStoreError::io("creating backup file", &path, err)),
            }
        }

        Err(BackupStoreError::NameExhausted {
            source_display: display.to_string(),
            root: self.root.clone(),
        })
    }

    /// Lists backups newest first, optionally only those taken from `display`.
    pub fn list(&self, display: Option<&str>) -> Result<Vec<Backup>, BackupStoreError> {
        let wanted = display.map(sanitize_source_for_filename);
        let entries = fs::read_dir(&self.root)
            .map_err(|source| BackupStoreError::io("listing backups", &self.root, source))?;

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|source| BackupStoreError::io("listing backups", &self.root, source))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let Some((source, stamp, sequence)) = parse_backup_name(&name) else {
                continue;
            };
            if wanted.as_deref().is_some_and(|wanted| wanted != source) {
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(|err| BackupStoreError::io("reading backup metadata", entry.path(), err))?;
            if !metadata.is_file() {
                continue;
            }

            backups.push(Backup {
                source: source.to_string(),
                timestamp: stamp.to_string(),
                sequence,
                stored_path: entry.path(),
                size: metadata.len(),
                name,
            });
        }

        backups.sort_by(|a, b| {
            (&b.timestamp, b.sequence, &b.name).cmp(&(&a.timestamp, a.sequence, &a.name))
        });
        Ok(backups)
    }

    /// Newest backup taken from `display`, if any.
    pub fn latest_for(&self, display: &str) -> Result<Option<Backup>, BackupStoreError> {
        Ok(self.list(Some(display))?.into_iter().next())
    }

    /// Copies backup `name` over `target`. The backup itself is left in place.
    pub fn restore(&self, name: &str, target: &Path) -> Result<u64, BackupStoreError> {
        let path = self.backup_path(name)?;
        if !path.is_file() {
            return Err(BackupStoreError::NotFound {
                name: name.to_string(),
                root: self.root.clone(),
            });
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| BackupStoreError::io("creating restore directory", parent, err))?;
        }
        let copied = fs::copy(&path, target)
            .map_err(|err| BackupStoreError::io("restoring backup", target, err))?;
        tracing::info!(backup = name, target = %target.display(), "restored backup");
        Ok(copied)
    }

    /// Resolves a bare backup name inside the store, rejecting anything path-like.
    pub fn backup_path(&self, name: &str) -> Result<PathBuf, BackupStoreError> {
        let invalid = name.is_empty()
            || name == "."
            || name.contains("..")
            || name.contains('/')
            || name.contains('\\');
        if invalid {
            return Err(BackupStoreError::InvalidBackupName {
                name: name.to_string(),
            });
        }
        Ok(self.root.join(name))
    }
}

fn current_stamp() -> Result<String, BackupStoreError> {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))
    .map_err(BackupStoreError::ClockFormat)
}
