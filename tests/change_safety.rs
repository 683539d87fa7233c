use std::fs;
use std::path::{Path, PathBuf};

use backup_store::BackupStore;
use mlx_code::{
    extract_file_intents, ApproveAll, BatchState, ChangeApplier, FileIntent, PathSandbox,
    RejectReason,
};
use pretty_assertions::assert_eq;

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    backup_dir: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let root = dir.path().join("project");
    fs::create_dir_all(&root).expect("project dir");
    Fixture {
        root: root.canonicalize().expect("canonical root"),
        backup_dir: dir.path().join("backups"),
        _dir: dir,
    }
}

fn applier(root: &Path, backup_dir: &Path) -> ChangeApplier {
    ChangeApplier::new(
        PathSandbox::new(root).expect("sandbox"),
        BackupStore::open(backup_dir).expect("backup store"),
    )
}

fn intent(path: &str, content: &str) -> FileIntent {
    FileIntent {
        path: path.to_string(),
        content: content.to_string(),
    }
}

#[test]
fn two_tagged_blocks_extract_in_order_and_apply() {
    let fx = fixture();
    let response = "Two files:\n\
        ```file:one.py\nprint(1)\n```\n\
        and\n\
        ```file:two/two.py\nprint(2)\nprint(22)\n```\n";

    let intents = extract_file_intents(response);
    assert_eq!(
        intents,
        vec![
            intent("one.py", "print(1)"),
            intent("two/two.py", "print(2)\nprint(22)")
        ]
    );

    let outcome = applier(&fx.root, &fx.backup_dir).apply(&intents, &fx.root, &mut ApproveAll);
    assert_eq!(outcome.state, BatchState::Applied);
    assert_eq!(fs::read_to_string(fx.root.join("one.py")).expect("read"), "print(1)\n");
    assert_eq!(
        fs::read_to_string(fx.root.join("two/two.py")).expect("read"),
        "print(2)\nprint(22)\n"
    );
}

#[test]
fn new_files_never_create_backups_and_overwrites_create_exactly_one() {
    let fx = fixture();
    let applier = applier(&fx.root, &fx.backup_dir);

    applier.apply(&[intent("n.py", "v1")], &fx.root, &mut ApproveAll);
    assert!(applier.backups().list(None).expect("list").is_empty());

    applier.apply(&[intent("n.py", "v2")], &fx.root, &mut ApproveAll);
    let backups = applier.backups().list(Some("n.py")).expect("list");
    assert_eq!(backups.len(), 1);
    assert_eq!(fs::read_to_string(&backups[0].stored_path).expect("read"), "v1\n");

    applier.apply(&[intent("n.py", "v3")], &fx.root, &mut ApproveAll);
    assert_eq!(applier.backups().list(Some("n.py")).expect("list").len(), 2);
}

#[test]
fn failed_backup_blocks_the_write() {
    let fx = fixture();
    fs::write(fx.root.join("keep.py"), "original\n").expect("seed");
    let applier = applier(&fx.root, &fx.backup_dir);
    fs::remove_dir_all(&fx.backup_dir).expect("remove store");
    fs::write(&fx.backup_dir, "blocking file").expect("block store");

    let outcome = applier.apply(&[intent("keep.py", "clobbered")], &fx.root, &mut ApproveAll);

    assert!(outcome.applied.is_empty());
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(
        fs::read_to_string(fx.root.join("keep.py")).expect("read"),
        "original\n"
    );
}

#[cfg(unix)]
#[test]
fn symlink_escapes_are_rejected() {
    let fx = fixture();
    let outside = tempfile::tempdir().expect("outside dir");
    std::os::unix::fs::symlink(outside.path(), fx.root.join("link")).expect("symlink");

    let outcome = applier(&fx.root, &fx.backup_dir).apply(
        &[intent("link/pwned.py", "x")],
        &fx.root,
        &mut ApproveAll,
    );

    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(outcome.rejected[0].reason, RejectReason::OutsideSandbox);
    assert!(!outside.path().join("pwned.py").exists());
}
