//! Heuristic discovery of file mentions in free text.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::sandbox::PathSandbox;

/// Pluggable strategy for turning free text into existing, sandboxed files.
pub trait ReferenceExtractor {
    fn extract(&self, text: &str, cwd: &Path) -> BTreeSet<PathBuf>;
}

static QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"["']([^"'\n]+\.[a-zA-Z0-9]+)["']"#).expect("quoted-name regex must compile")
});

static PHRASED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:in|at|see|check|read|open|look at|modify|edit|update|fix)\s+([a-zA-Z0-9_\-./]+\.[a-zA-Z0-9]+)",
    )
    .expect("phrased-name regex must compile")
});

static BACKTICKED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"`([^`\n]+\.[a-zA-Z0-9]+)`").expect("backtick-name regex must compile")
});

static BARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b([a-zA-Z0-9_\-]+\.(?:py|js|jsx|ts|tsx|java|cpp|c|h|go|rs|rb|php|html|css|json|yaml|yml|md|txt))\b",
    )
    .expect("bare-name regex must compile")
});

/// Candidate names in pattern order, duplicates removed.
#[must_use]
pub fn candidate_names(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut names = Vec::new();
    for pattern in [&*QUOTED, &*PHRASED, &*BACKTICKED, &*BARE] {
        for captures in pattern.captures_iter(text) {
            let Some(name) = captures.get(1) else {
                continue;
            };
            let name = name.as_str().trim().trim_end_matches('.');
            if !name.is_empty() && seen.insert(name.to_string()) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Regex patterns plus a bounded tree search for bare names.
#[derive(Debug, Clone)]
pub struct HeuristicReferenceExtractor {
    sandbox: PathSandbox,
    search_depth: usize,
}

impl HeuristicReferenceExtractor {
    #[must_use]
    pub fn new(sandbox: PathSandbox, search_depth: usize) -> Self {
        Self {
            sandbox,
            search_depth,
        }
    }

    fn resolve_candidate(&self, name: &str, cwd: &Path) -> Option<PathBuf> {
        let direct = self.sandbox.resolve(name, cwd);
        if direct.is_file() {
            return Some(direct);
        }
        // Names that already carry a directory are taken literally.
        if name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return None;
        }
        find_file_in_tree(cwd, name, self.search_depth)
    }
}

impl ReferenceExtractor for HeuristicReferenceExtractor {
    fn extract(&self, text: &str, cwd: &Path) -> BTreeSet<PathBuf> {
        candidate_names(text)
            .iter()
            .filter_map(|name| self.resolve_candidate(name, cwd))
            .filter(|path| self.sandbox.is_safe(path))
            .map(|path| crate::sandbox::real_path(&path))
            .collect()
    }
}

/// Shallowest file named `name` under `start`, skipping hidden directories.
#[must_use]
pub fn find_file_in_tree(start: &Path, name: &str, max_depth: usize) -> Option<PathBuf> {
    let mut best: Option<(usize, PathBuf)> = None;
    let walker = WalkDir::new(start)
        .min_depth(1)
        .max_depth(max_depth + 1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

    for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() || entry.file_name() != name {
            continue;
        }
        let depth = entry.depth();
        if best.as_ref().map_or(true, |(best_depth, _)| depth < *best_depth) {
            best = Some((depth, entry.into_path()));
        }
    }
    best.map(|(_, path)| path)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|name| name.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::fs;

    use pretty_assertions::assert_eq;

    use super::{
        candidate_names, find_file_in_tree, HeuristicReferenceExtractor, ReferenceExtractor,
    };
    use crate::sandbox::PathSandbox;

    fn project() -> (tempfile::TempDir, HeuristicReferenceExtractor) {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let sandbox = PathSandbox::new(dir.path()).expect("sandbox should open");
        (dir, HeuristicReferenceExtractor::new(sandbox, 3))
    }

    #[test]
    fn candidate_names_cover_each_phrasing() {
        let names = candidate_names(
            "Look at \"config.yaml\", then check src/app.ts and `lib/util.rs`; also main.py.",
        );
        assert_eq!(
            names,
            vec![
                "config.yaml".to_string(),
                "src/app.ts".to_string(),
                "lib/util.rs".to_string(),
                "app.ts".to_string(),
                "util.rs".to_string(),
                "main.py".to_string(),
            ]
        );
    }

    #[test]
    fn plain_prose_yields_no_candidates() {
        assert!(candidate_names("please make the tests faster").is_empty());
    }

    #[test]
    fn fix_phrasing_resolves_file_in_cwd() {
        let (dir, extractor) = project();
        fs::write(dir.path().join("utils.py"), "def f():\n    return 1\n").expect("write");
        let cwd = dir.path().canonicalize().expect("canonical");

        let found = extractor.extract("fix bugs in utils.py", &cwd);
        assert_eq!(found, BTreeSet::from([cwd.join("utils.py")]));
    }

    #[test]
    fn missing_bare_names_fall_back_to_tree_search() {
        let (dir, extractor) = project();
        let nested = dir.path().join("pkg").join("core");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(nested.join("engine.rs"), "fn run() {}\n").expect("write");
        fs::create_dir_all(dir.path().join(".git")).expect("mkdir");
        fs::write(dir.path().join(".git").join("hooks.rs"), "").expect("write");
        let cwd = dir.path().canonicalize().expect("canonical");

        let found = extractor.extract("what does engine.rs do? and hooks.rs?", &cwd);
        assert_eq!(found, BTreeSet::from([cwd.join("pkg/core/engine.rs")]));
    }

    #[test]
    fn tree_search_prefers_shallowest_match_and_respects_depth() {
        let (dir, _) = project();
        fs::create_dir_all(dir.path().join("a/b/c/d")).expect("mkdir");
        fs::write(dir.path().join("a/b/c/d/deep.py"), "").expect("write");
        fs::write(dir.path().join("a/b/twice.py"), "").expect("write");
        fs::write(dir.path().join("a/twice.py"), "").expect("write");

        assert_eq!(
            find_file_in_tree(dir.path(), "twice.py", 3),
            Some(dir.path().join("a/twice.py"))
        );
        assert_eq!(find_file_in_tree(dir.path(), "deep.py", 3), None);
    }

    #[test]
    fn explicit_paths_are_not_searched() {
        let (dir, extractor) = project();
        fs::create_dir_all(dir.path().join("src")).expect("mkdir");
        fs::write(dir.path().join("src/main.rs"), "").expect("write");
        let cwd = dir.path().canonicalize().expect("canonical");

        assert!(extractor.extract("open lib/absent.rs", &cwd).is_empty());
        assert_eq!(
            extractor.extract("open src/main.rs", &cwd),
            BTreeSet::from([cwd.join("src/main.rs")])
        );
    }

    #[test]
    fn files_outside_the_root_are_dropped() {
        let outer = tempfile::tempdir().expect("tempdir should be created");
        let inner = outer.path().join("project");
        fs::create_dir_all(&inner).expect("mkdir");
        fs::write(outer.path().join("secret.txt"), "token").expect("write");
        let sandbox = PathSandbox::new(&inner).expect("sandbox should open");
        let extractor = HeuristicReferenceExtractor::new(sandbox, 3);
        let cwd = inner.canonicalize().expect("canonical");

        assert!(extractor.extract("read ../secret.txt", &cwd).is_empty());
    }
}
