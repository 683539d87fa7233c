//! Conversation history and loaded files, each under its own budget.

mod files;
mod history;

use std::path::Path;

pub use files::{FileBody, FileContext, LoadedFile};
pub use history::{fingerprint, History, Message, MessageTag, Role};

use crate::config::AssistantConfig;

#[derive(Debug, Clone)]
pub struct ContextStore {
    history: History,
    files: FileContext,
    max_older_important: usize,
    fingerprint_chars: usize,
}

impl ContextStore {
    #[must_use]
    pub fn new(config: &AssistantConfig) -> Self {
        Self {
            history: History::new(config.history_budget_chars, config.recent_window),
            files: FileContext::new(config.file_context_budget_chars, config.per_file_cap_chars),
            max_older_important: config.max_older_important,
            fingerprint_chars: config.fingerprint_chars,
        }
    }

    /// Appends to history and re-applies the history budget.
    pub fn append(&mut self, role: Role, text: impl Into<String>, tag: MessageTag) -> u64 {
        self.history.append(role, text, tag)
    }

    pub fn trim(&mut self) -> usize {
        self.history.trim()
    }

    #[must_use]
    pub fn select_for_prompt(&self) -> Vec<&Message> {
        self.history
            .select_for_prompt(self.max_older_important, self.fingerprint_chars)
    }

    #[must_use]
    pub fn assemble_file_context(&self) -> String {
        self.files.assemble()
    }

    pub fn upsert_file(&mut self, file: LoadedFile) {
        tracing::debug!(
            path = %file.display(),
            truncated = file.truncated(),
            "file loaded into context"
        );
        self.files.upsert(file);
    }

    #[must_use]
    pub fn is_loaded(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    #[must_use]
    pub fn loaded_file(&self, path: &Path) -> Option<&LoadedFile> {
        self.files.get(path)
    }

    /// Loaded files, most recently loaded first.
    #[must_use]
    pub fn loaded_files(&self) -> Vec<&LoadedFile> {
        self.files.most_recent_first()
    }

    pub fn clear_files(&mut self) {
        self.files.clear();
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    #[must_use]
    pub fn history(&self) -> &[Message] {
        self.history.messages()
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn history_chars(&self) -> usize {
        self.history.total_chars()
    }

    #[must_use]
    pub fn history_budget(&self) -> usize {
        self.history.budget_chars()
    }

    pub fn set_history_budget(&mut self, chars: usize) -> usize {
        self.history.set_budget(chars)
    }
}
