use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::AssistantError;
use crate::sandbox::PathSandbox;

/// What the model sees for a loaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileBody {
    Text(String),
    /// Short textual stand-in for binary image content.
    ImageDescription(String),
}

impl FileBody {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(text) | Self::ImageDescription(text) => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedFile {
    path: PathBuf,
    display: String,
    body: FileBody,
    truncated: bool,
    size: u64,
}

impl LoadedFile {
    /// Builds a loaded file for a path that must pass the sandbox.
    pub fn new(
        sandbox: &PathSandbox,
        path: &Path,
        body: FileBody,
        truncated: bool,
        size: u64,
    ) -> Result<Self, AssistantError> {
        let path = sandbox.check(path)?;
        Ok(Self {
            display: sandbox.display(&path),
            path,
            body,
            truncated,
            size,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn display(&self) -> &str {
        &self.display
    }

    #[must_use]
    pub fn body(&self) -> &FileBody {
        &self.body
    }

    #[must_use]
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Size on disk in bytes when loaded.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Loaded files keyed by absolute path, rendered newest-first under a budget.
#[derive(Debug, Clone)]
pub struct FileContext {
    files: HashMap<PathBuf, (u64, LoadedFile)>,
    next_seq: u64,
    budget_chars: usize,
    per_file_cap_chars: usize,
}

impl FileContext {
    #[must_use]
    pub fn new(budget_chars: usize, per_file_cap_chars: usize) -> Self {
        Self {
            files: HashMap::new(),
            next_seq: 0,
            budget_chars,
            per_file_cap_chars,
        }
    }

    /// Inserts or replaces the entry for the file's path and marks it most recent.
    pub fn upsert(&mut self, file: LoadedFile) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.files.insert(file.path.clone(), (seq, file));
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&LoadedFile> {
        self.files.get(path).map(|(_, file)| file)
    }

    pub fn remove(&mut self, path: &Path) -> Option<LoadedFile> {
        self.files.remove(path).map(|(_, file)| file)
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    #[must_use]
    pub fn budget_chars(&self) -> usize {
        self.budget_chars
    }

    /// Most recently loaded first.
    #[must_use]
    pub fn most_recent_first(&self) -> Vec<&LoadedFile> {
        let mut entries: Vec<&(u64, LoadedFile)> = self.files.values().collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        entries.into_iter().map(|(_, file)| file).collect()
    }

    /// Renders every file that fits, newest first, within the character budget.
    ///
    /// The whole returned string (header, section titles, bodies, notices)
    /// never exceeds the budget. Each text body is capped per file and cut
    /// bodies carry a truncation notice. When files are left out, the output
    /// ends with a notice counting them; room for that notice is reserved
    /// before each file is admitted.
    #[must_use]
    pub fn assemble(&self) -> String {
        let files = self.most_recent_first();
        if files.is_empty() {
            return String::new();
        }

        let total = files.len();
        let mut out = format!(
            "Files in context ({total} loaded, budget {} chars):",
            self.budget_chars
        );
        let mut used = out.chars().count();
        if used > self.budget_chars {
            return String::new();
        }

        for (position, file) in files.iter().enumerate() {
            let remaining_after = total - position - 1;
            let reserve = if remaining_after > 0 {
                skip_notice(remaining_after).chars().count()
            } else {
                0
            };
            let title = format!("\n--- {} ---\n", file.display);
            let title_chars = title.chars().count();
            let available = self
                .budget_chars
                .saturating_sub(used + reserve + title_chars);

            let Some(section_body) = self.render_body(&file.body, available) else {
                out.push_str(&skip_notice(total - position));
                return out;
            };

            used += title_chars + section_body.chars().count();
            out.push_str(&title);
            out.push_str(&section_body);
        }

        out
    }

    fn render_body(&self, body: &FileBody, available: usize) -> Option<String> {
        match body {
            FileBody::ImageDescription(text) => {
                (text.chars().count() <= available).then(|| text.clone())
            }
            FileBody::Text(text) => {
                let length = text.chars().count();
                if length <= self.per_file_cap_chars.min(available) {
                    return Some(text.clone());
                }

                // Upper bound on the notice: `available` has at least as many digits as `shown`.
                let notice_bound = truncation_notice(length, available).chars().count();
                let shown = self
                    .per_file_cap_chars
                    .min(available.saturating_sub(notice_bound));
                if shown == 0 {
                    return None;
                }

                let mut preview: String = text.chars().take(shown).collect();
                preview.push_str(&truncation_notice(length, shown));
                Some(preview)
            }
        }
    }
}

fn skip_notice(count: usize) -> String {
    format!("\n[... {count} more file(s) skipped - context budget exhausted ...]")
}

fn truncation_notice(total: usize, shown: usize) -> String {
    format!("\n[... TRUNCATED - {total} chars total, showing {shown} ...]")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use pretty_assertions::assert_eq;

    use super::{FileBody, FileContext, LoadedFile};
    use crate::sandbox::PathSandbox;

    fn fixture() -> (tempfile::TempDir, PathSandbox) {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let sandbox = PathSandbox::new(dir.path()).expect("sandbox should open");
        (dir, sandbox)
    }

    fn loaded(sandbox: &PathSandbox, name: &str, text: &str) -> LoadedFile {
        let path = sandbox.root().join(name);
        fs::write(&path, text).expect("fixture should be written");
        LoadedFile::new(
            sandbox,
            &path,
            FileBody::Text(text.to_string()),
            false,
            text.len() as u64,
        )
        .expect("fixture path is inside the sandbox")
    }

    #[test]
    fn loaded_file_rejects_paths_outside_sandbox() {
        let (dir, _) = fixture();
        fs::create_dir_all(dir.path().join("inner")).expect("inner should be created");
        let sandbox = PathSandbox::new(dir.path().join("inner")).expect("sandbox should open");
        let error = LoadedFile::new(
            &sandbox,
            &dir.path().join("outside.txt"),
            FileBody::Text(String::new()),
            false,
            0,
        )
        .expect_err("outside path must be rejected");
        assert!(error.is_sandbox_violation());
    }

    #[test]
    fn upsert_replaces_and_bumps_recency() {
        let (_dir, sandbox) = fixture();
        let mut files = FileContext::new(15_000, 3_000);
        files.upsert(loaded(&sandbox, "a.py", "a1"));
        files.upsert(loaded(&sandbox, "b.py", "b1"));
        files.upsert(loaded(&sandbox, "a.py", "a2"));

        let order: Vec<(&str, &str)> = files
            .most_recent_first()
            .into_iter()
            .map(|file| (file.display(), file.body().as_str()))
            .collect();
        assert_eq!(order, vec![("a.py", "a2"), ("b.py", "b1")]);
    }

    #[test]
    fn assemble_renders_small_files_verbatim_newest_first() {
        let (_dir, sandbox) = fixture();
        let mut files = FileContext::new(15_000, 3_000);
        files.upsert(loaded(&sandbox, "old.py", "print('old')"));
        files.upsert(loaded(&sandbox, "new.py", "print('new')"));

        assert_eq!(
            files.assemble(),
            "Files in context (2 loaded, budget 15000 chars):\n--- new.py ---\nprint('new')\n--- old.py ---\nprint('old')"
        );
    }

    #[test]
    fn assemble_caps_each_file_and_marks_truncation() {
        let (_dir, sandbox) = fixture();
        let mut files = FileContext::new(15_000, 100);
        files.upsert(loaded(&sandbox, "big.rs", &"x".repeat(500)));

        let rendered = files.assemble();
        let marker = "[... TRUNCATED - 500 chars total, showing 100 ...]";
        assert!(rendered.contains(&format!("{}\n{marker}", "x".repeat(100))));
        assert!(!rendered.contains(&"x".repeat(101)));
    }

    #[test]
    fn assemble_never_exceeds_budget_and_counts_skipped_files() {
        let (_dir, sandbox) = fixture();
        for budget in [256, 300, 700, 1_500, 4_000] {
            let mut files = FileContext::new(budget, 3_000);
            for index in 0..12 {
                files.upsert(loaded(
                    &sandbox,
                    &format!("file{index}.py"),
                    &format!("{index}").repeat(400),
                ));
            }

            let rendered = files.assemble();
            assert!(
                rendered.chars().count() <= budget,
                "budget {budget} exceeded: {}",
                rendered.chars().count()
            );

            let included = rendered.matches("\n--- ").count();
            assert!(included < 12);
            assert!(rendered.ends_with(&format!(
                "[... {} more file(s) skipped - context budget exhausted ...]",
                12 - included
            )));
        }
    }

    #[test]
    fn assemble_is_deterministic() {
        let (_dir, sandbox) = fixture();
        let mut files = FileContext::new(900, 250);
        for index in 0..6 {
            files.upsert(loaded(&sandbox, &format!("m{index}.rs"), &"fn x() {}\n".repeat(40)));
        }
        assert_eq!(files.assemble(), files.assemble());
        assert_eq!(files.assemble(), files.clone().assemble());
    }

    #[test]
    fn image_descriptions_are_never_cut() {
        let (_dir, sandbox) = fixture();
        let path = sandbox.root().join("logo.png");
        fs::write(&path, b"not really a png").expect("fixture should be written");
        let mut files = FileContext::new(15_000, 5);
        files.upsert(
            LoadedFile::new(
                &sandbox,
                &path,
                FileBody::ImageDescription("[Image: logo.png]".to_string()),
                false,
                16,
            )
            .expect("inside sandbox"),
        );
        assert!(files.assemble().ends_with("--- logo.png ---\n[Image: logo.png]"));
    }

    #[test]
    fn empty_context_renders_nothing() {
        assert_eq!(FileContext::new(15_000, 3_000).assemble(), "");
    }
}
