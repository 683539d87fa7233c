//! Turning file intents into reviewed, backed-up filesystem writes.
//!
//! Per batch: resolve and sandbox-check every intent, read the current
//! content, show a diff, collect one batch decision, then apply the
//! approved changes one at a time. A file that existed is always backed up
//! before it is overwritten; if the backup fails the write is skipped.
//! Failures stay local to the file that caused them.

use std::fs;
use std::path::{Path, PathBuf};

use backup_store::{Backup, BackupStore};
use similar::TextDiff;

use crate::edit_protocol::{normalize_trailing_newline, FileIntent};
use crate::error::AssistantError;
use crate::logging::{log_operation, Operation};
use crate::sandbox::{is_allowed_extension, PathSandbox};

const NEW_FILE_PREVIEW_CHARS: usize = 600;

/// A sandbox-checked change awaiting review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    path: PathBuf,
    display: String,
    old: String,
    new: String,
    existed: bool,
}

impl PendingChange {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn display(&self) -> &str {
        &self.display
    }

    #[must_use]
    pub fn old(&self) -> &str {
        &self.old
    }

    /// New content, always ending with exactly one newline.
    #[must_use]
    pub fn new_content(&self) -> &str {
        &self.new
    }

    #[must_use]
    pub fn existed(&self) -> bool {
        self.existed
    }

    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.existed && self.old == self.new
    }

    /// Unified diff against the current file, or a preview for new files.
    #[must_use]
    pub fn render_diff(&self) -> String {
        if !self.existed {
            let mut preview: String = self.new.chars().take(NEW_FILE_PREVIEW_CHARS).collect();
            if self.new.chars().count() > NEW_FILE_PREVIEW_CHARS {
                preview.push_str("\n...");
            }
            return format!("NEW FILE: {}\n{preview}", self.display);
        }

        let diff = TextDiff::from_lines(self.old.as_str(), self.new.as_str());
        let rendered = diff
            .unified_diff()
            .context_radius(3)
            .header(
                &format!("a/{}", self.display),
                &format!("b/{}", self.display),
            )
            .to_string();
        rendered
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDecision {
    ApplyAll,
    Individually,
    CancelAll,
}

/// User-facing confirmation points of the apply flow.
pub trait ChangeReviewer {
    /// Asked before preparing a change to a file with an unrecognized extension.
    fn confirm_unusual_extension(&mut self, display: &str) -> bool;

    fn review_batch(&mut self, changes: &[PendingChange]) -> BatchDecision;

    /// Asked per change after [`BatchDecision::Individually`].
    fn confirm_change(&mut self, change: &PendingChange) -> bool;
}

/// Approves everything. Used for non-interactive runs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApproveAll;

impl ChangeReviewer for ApproveAll {
    fn confirm_unusual_extension(&mut self, _display: &str) -> bool {
        true
    }

    fn review_batch(&mut self, _changes: &[PendingChange]) -> BatchDecision {
        BatchDecision::ApplyAll
    }

    fn confirm_change(&mut self, _change: &PendingChange) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub path: PathBuf,
    pub display: String,
    /// Copy of the previous content, present whenever the file existed.
    pub backup: Option<Backup>,
    pub lines: usize,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    OutsideSandbox,
    UnusualExtension,
    Declined,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::OutsideSandbox => "outside the project root",
            Self::UnusualExtension => "unusual extension",
            Self::Declined => "declined",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedChange {
    /// Display path, or the raw intent path when it never resolved.
    pub target: String,
    pub reason: RejectReason,
}

#[derive(Debug)]
pub struct FailedChange {
    pub target: String,
    pub error: AssistantError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Applied,
    PartiallyApplied,
    Cancelled,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub applied: Vec<AppliedChange>,
    pub rejected: Vec<RejectedChange>,
    pub failed: Vec<FailedChange>,
    pub state: BatchState,
}

impl BatchOutcome {
    fn settle(
        applied: Vec<AppliedChange>,
        rejected: Vec<RejectedChange>,
        failed: Vec<FailedChange>,
        cancelled: bool,
    ) -> Self {
        let nothing_done = applied.is_empty() && failed.is_empty() && !rejected.is_empty();
        let state = if cancelled || nothing_done {
            BatchState::Cancelled
        } else if rejected.is_empty() && failed.is_empty() {
            BatchState::Applied
        } else {
            BatchState::PartiallyApplied
        };
        Self {
            applied,
            rejected,
            failed,
            state,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeApplier {
    sandbox: PathSandbox,
    backups: BackupStore,
}

impl ChangeApplier {
    #[must_use]
    pub fn new(sandbox: PathSandbox, backups: BackupStore) -> Self {
        Self { sandbox, backups }
    }

    #[must_use]
    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    /// Runs one batch through review and applies what was approved.
    pub fn apply(
        &self,
        intents: &[FileIntent],
        cwd: &Path,
        reviewer: &mut dyn ChangeReviewer,
    ) -> BatchOutcome {
        let mut rejected = Vec::new();
        let mut failed = Vec::new();
        let mut pending = Vec::new();

        for intent in intents {
            match self.prepare(intent, cwd, reviewer) {
                Ok(Ok(change)) => pending.push(change),
                Ok(Err(rejection)) => rejected.push(rejection),
                Err(error) => failed.push(FailedChange {
                    target: intent.path.clone(),
                    error,
                }),
            }
        }

        if pending.is_empty() {
            return BatchOutcome::settle(Vec::new(), rejected, failed, false);
        }

        let decision = reviewer.review_batch(&pending);
        if decision == BatchDecision::CancelAll {
            rejected.extend(pending.iter().map(|change| RejectedChange {
                target: change.display.clone(),
                reason: RejectReason::Declined,
            }));
            return BatchOutcome::settle(Vec::new(), rejected, failed, true);
        }

        let mut applied = Vec::new();
        for change in &pending {
            if decision == BatchDecision::Individually && !reviewer.confirm_change(change) {
                rejected.push(RejectedChange {
                    target: change.display.clone(),
                    reason: RejectReason::Declined,
                });
                continue;
            }
            match self.write(change) {
                Ok(done) => applied.push(done),
                Err(error) => failed.push(FailedChange {
                    target: change.display.clone(),
                    error,
                }),
            }
        }

        BatchOutcome::settle(applied, rejected, failed, false)
    }

    /// Resolves, checks, and reads one intent.
    ///
    /// The outer `Err` is an I/O failure; the inner one a rejection.
    pub fn prepare(
        &self,
        intent: &FileIntent,
        cwd: &Path,
        reviewer: &mut dyn ChangeReviewer,
    ) -> Result<Result<PendingChange, RejectedChange>, AssistantError> {
        let resolved = self.sandbox.resolve(&intent.path, cwd);
        let path = match self.sandbox.check(&resolved) {
            Ok(path) => path,
            Err(_) => {
                log_operation(
                    Operation::BlockedWrite,
                    &format!("{} resolved outside sandbox", intent.path),
                );
                return Ok(Err(RejectedChange {
                    target: intent.path.clone(),
                    reason: RejectReason::OutsideSandbox,
                }));
            }
        };
        let display = self.sandbox.display(&path);

        if !is_allowed_extension(&path) && !reviewer.confirm_unusual_extension(&display) {
            return Ok(Err(RejectedChange {
                target: display,
                reason: RejectReason::UnusualExtension,
            }));
        }

        let existed = path.exists();
        let old = if existed {
            fs::read_to_string(&path)
                .map_err(|source| AssistantError::io("reading current content", &path, source))?
        } else {
            String::new()
        };

        Ok(Ok(PendingChange {
            path,
            display,
            old,
            new: normalize_trailing_newline(&intent.content),
            existed,
        }))
    }

    /// Backs up (when the file existed) and writes one approved change.
    pub fn write(&self, change: &PendingChange) -> Result<AppliedChange, AssistantError> {
        let path = match self.sandbox.check(&change.path) {
            Ok(path) => path,
            Err(error) => {
                log_operation(
                    Operation::BlockedWrite,
                    &format!("{} resolved outside sandbox", change.display),
                );
                return Err(error);
            }
        };

        let backup = if change.existed {
            match self.backups.create(&path, &change.display) {
                Ok(backup) => Some(backup),
                Err(error) => {
                    log_operation(
                        Operation::BackupFailed,
                        &format!("{}: {error}", change.display),
                    );
                    return Err(error.into());
                }
            }
        } else {
            None
        };

        if let Some(parent) = path.parent() {
            self.sandbox.check(parent)?;
            fs::create_dir_all(parent).map_err(|source| {
                AssistantError::io("creating parent directories", parent, source)
            })?;
        }

        if let Err(source) = fs::write(&path, &change.new) {
            log_operation(
                Operation::FileWriteError,
                &format!("{}: {source}", change.display),
            );
            return Err(AssistantError::io("writing file", &path, source));
        }

        let lines = change.new.lines().count();
        log_operation(
            Operation::FileWrite,
            &format!("{} ({lines} lines)", change.display),
        );
        Ok(AppliedChange {
            path,
            display: change.display.clone(),
            backup,
            lines,
            content: change.new.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use backup_store::BackupStore;
    use pretty_assertions::assert_eq;

    use super::{
        ApproveAll, BatchDecision, BatchState, ChangeApplier, ChangeReviewer, PendingChange,
        RejectReason,
    };
    use crate::edit_protocol::FileIntent;
    use crate::sandbox::PathSandbox;

    struct Scripted {
        decision: BatchDecision,
        individual: Vec<bool>,
        unusual: bool,
        reviewed: usize,
    }

    impl ChangeReviewer for Scripted {
        fn confirm_unusual_extension(&mut self, _display: &str) -> bool {
            self.unusual
        }

        fn review_batch(&mut self, changes: &[PendingChange]) -> BatchDecision {
            self.reviewed = changes.len();
            self.decision
        }

        fn confirm_change(&mut self, _change: &PendingChange) -> bool {
            if self.individual.is_empty() {
                false
            } else {
                self.individual.remove(0)
            }
        }
    }

    fn scripted(decision: BatchDecision) -> Scripted {
        Scripted {
            decision,
            individual: Vec::new(),
            unusual: false,
            reviewed: 0,
        }
    }

    fn intent(path: &str, content: &str) -> FileIntent {
        FileIntent {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: std::path::PathBuf,
        applier: ChangeApplier,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let project = dir.path().join("project");
        fs::create_dir_all(&project).expect("mkdir");
        let sandbox = PathSandbox::new(&project).expect("sandbox should open");
        let backups = BackupStore::open(dir.path().join("backups")).expect("backup store");
        Fixture {
            root: sandbox.root().to_path_buf(),
            _dir: dir,
            applier: ChangeApplier::new(sandbox, backups),
        }
    }

    #[test]
    fn new_file_is_written_without_backup() {
        let fx = fixture();
        let outcome = fx
            .applier
            .apply(&[intent("src/new.py", "x = 1")], &fx.root, &mut ApproveAll);

        assert_eq!(outcome.state, BatchState::Applied);
        assert_eq!(outcome.applied.len(), 1);
        assert!(outcome.applied[0].backup.is_none());
        assert_eq!(
            fs::read_to_string(fx.root.join("src/new.py")).expect("read"),
            "x = 1\n"
        );
        assert!(fx.applier.backups().list(None).expect("list").is_empty());
    }

    #[test]
    fn overwrite_creates_exactly_one_backup_of_prior_content() {
        let fx = fixture();
        fs::write(fx.root.join("a.py"), "old\n").expect("write");

        let outcome = fx
            .applier
            .apply(&[intent("a.py", "new\n\n")], &fx.root, &mut ApproveAll);

        assert_eq!(outcome.state, BatchState::Applied);
        let backups = fx.applier.backups().list(None).expect("list");
        assert_eq!(backups.len(), 1);
        assert_eq!(
            fs::read_to_string(&backups[0].stored_path).expect("read backup"),
            "old\n"
        );
        assert_eq!(fs::read_to_string(fx.root.join("a.py")).expect("read"), "new\n");
    }

    #[test]
    fn backup_failure_leaves_target_untouched() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let project = dir.path().join("project");
        fs::create_dir_all(&project).expect("mkdir");
        fs::write(project.join("keep.py"), "precious\n").expect("write");
        let backups = BackupStore::open(dir.path().join("backups")).expect("backup store");
        // Replace the store directory with a file so copies fail.
        fs::remove_dir_all(dir.path().join("backups")).expect("remove");
        fs::write(dir.path().join("backups"), "not a directory").expect("write");
        let sandbox = PathSandbox::new(&project).expect("sandbox should open");
        let root = sandbox.root().to_path_buf();
        let applier = ChangeApplier::new(sandbox, backups);

        let outcome = applier.apply(&[intent("keep.py", "overwritten")], &root, &mut ApproveAll);

        assert_eq!(outcome.state, BatchState::PartiallyApplied);
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(
            fs::read_to_string(root.join("keep.py")).expect("read"),
            "precious\n"
        );
    }

    #[test]
    fn escaping_paths_are_rejected_and_siblings_still_apply() {
        let fx = fixture();
        let outcome = fx.applier.apply(
            &[intent("../evil.py", "boom"), intent("ok.py", "fine")],
            &fx.root,
            &mut ApproveAll,
        );

        assert_eq!(outcome.state, BatchState::PartiallyApplied);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].reason, RejectReason::OutsideSandbox);
        assert!(!fx.root.parent().expect("parent").join("evil.py").exists());
        assert_eq!(fs::read_to_string(fx.root.join("ok.py")).expect("read"), "fine\n");
    }

    #[test]
    fn unreadable_target_fails_only_that_change() {
        let fx = fixture();
        fs::create_dir_all(fx.root.join("dir.py")).expect("mkdir");
        let outcome = fx.applier.apply(
            &[intent("dir.py", "x"), intent("b.py", "y")],
            &fx.root,
            &mut ApproveAll,
        );

        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].target, "dir.py");
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.state, BatchState::PartiallyApplied);
    }

    #[test]
    fn cancel_all_writes_nothing() {
        let fx = fixture();
        let mut reviewer = scripted(BatchDecision::CancelAll);
        let outcome = fx.applier.apply(
            &[intent("a.py", "1"), intent("b.py", "2")],
            &fx.root,
            &mut reviewer,
        );

        assert_eq!(reviewer.reviewed, 2);
        assert_eq!(outcome.state, BatchState::Cancelled);
        assert!(!fx.root.join("a.py").exists());
        assert!(!fx.root.join("b.py").exists());
    }

    #[test]
    fn individual_review_applies_only_approved_changes() {
        let fx = fixture();
        let mut reviewer = scripted(BatchDecision::Individually);
        reviewer.individual = vec![false, true];
        let outcome = fx.applier.apply(
            &[intent("a.py", "1"), intent("b.py", "2")],
            &fx.root,
            &mut reviewer,
        );

        assert_eq!(outcome.state, BatchState::PartiallyApplied);
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.applied[0].display, "b.py");
        assert!(!fx.root.join("a.py").exists());
    }

    #[test]
    fn unusual_extension_needs_confirmation() {
        let fx = fixture();
        let mut reviewer = scripted(BatchDecision::ApplyAll);
        let outcome = fx
            .applier
            .apply(&[intent("payload.exe", "MZ")], &fx.root, &mut reviewer);

        assert_eq!(outcome.state, BatchState::Cancelled);
        assert_eq!(outcome.rejected[0].reason, RejectReason::UnusualExtension);
        assert!(!fx.root.join("payload.exe").exists());
    }

    #[test]
    fn diff_rendering() {
        let fx = fixture();
        fs::write(fx.root.join("m.py"), "a\nb\n").expect("write");
        let existing = fx
            .applier
            .prepare(&intent("m.py", "a\nc"), &fx.root, &mut ApproveAll)
            .expect("readable")
            .expect("accepted");
        let diff = existing.render_diff();
        assert!(diff.contains("--- a/m.py"));
        assert!(diff.contains("+++ b/m.py"));
        assert!(diff.contains("-b\n"));
        assert!(diff.contains("+c\n"));

        let fresh = fx
            .applier
            .prepare(&intent("n.py", "print()"), &fx.root, &mut ApproveAll)
            .expect("readable")
            .expect("accepted");
        assert_eq!(fresh.render_diff(), "NEW FILE: n.py\nprint()\n");
        assert!(!fresh.is_unchanged());
    }
}
