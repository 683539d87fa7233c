//! One interactive session: the per-turn pipeline plus file commands.

use std::fs;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use backup_store::{Backup, BackupStore};
use generation_backend::{BackendProfile, CancelSignal, GenerationBackend, RunId};
use serde::Serialize;

use crate::changes::{BatchOutcome, ChangeApplier, ChangeReviewer};
use crate::config::{AssistantConfig, ProjectConfig};
use crate::context::{ContextStore, FileBody, LoadedFile, Message, MessageTag, Role};
use crate::edit_protocol::{self, suggested_extension, CodeBlock, FileIntent};
use crate::error::AssistantError;
use crate::loader::{parse_open_target, read_text_prefix, FileLoader};
use crate::logging::{log_operation, Operation};
use crate::progress::ProgressGuard;
use crate::project::{detect_project_type, ProjectContext, ProjectType};
use crate::prompt::{PromptAssembler, TurnContext};
use crate::references::{HeuristicReferenceExtractor, ReferenceExtractor};
use crate::sandbox::PathSandbox;
use crate::stream::{ResponseStream, StopReason, StreamSink, StreamStats};

/// Marker that tags an assistant reply as carrying file edits.
const FILE_BLOCK_MARKER: &str = "```file:";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub queries: u64,
    pub files_modified: u64,
    pub files_auto_loaded: u64,
    pub tokens_generated: u64,
    pub prompt_chars: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub response: String,
    pub stop: StopReason,
    pub stats: StreamStats,
    /// Display paths of files auto-loaded for this turn.
    pub auto_loaded: Vec<String>,
}

/// Result of a `/replace`: what matched and what the review decided.
#[derive(Debug)]
pub struct Replacement {
    pub display: String,
    pub found: usize,
    /// Occurrences rewritten if the change was applied.
    pub replaced: usize,
    pub batch: BatchOutcome,
}

/// A file written this session and the backup taken before the write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub path: PathBuf,
    pub display: String,
    pub backup: Option<Backup>,
}

pub struct AssistantSession {
    config: AssistantConfig,
    sandbox: PathSandbox,
    backend: Arc<dyn GenerationBackend>,
    store: ContextStore,
    extractor: Box<dyn ReferenceExtractor + Send>,
    loader: FileLoader,
    assembler: PromptAssembler,
    applier: ChangeApplier,
    cwd: PathBuf,
    project: ProjectContext,
    project_type: Option<ProjectType>,
    stats: SessionStats,
    modifications: Vec<Modification>,
    last_query: Option<String>,
    last_response: Option<String>,
    auto_context: bool,
    next_run_id: RunId,
}

impl AssistantSession {
    /// Opens a session rooted at `config.root`, starting in the root.
    pub fn new(
        config: AssistantConfig,
        backend: Arc<dyn GenerationBackend>,
    ) -> Result<Self, AssistantError> {
        config.validate()?;
        let sandbox = PathSandbox::new(&config.root)?;
        let backups = BackupStore::open(&config.backup_dir)?;
        let extractor = HeuristicReferenceExtractor::new(sandbox.clone(), config.search_depth);

        let mut session = Self {
            store: ContextStore::new(&config),
            extractor: Box::new(extractor),
            loader: FileLoader::new(&config),
            assembler: PromptAssembler::new(sandbox.clone(), config.max_tokens),
            applier: ChangeApplier::new(sandbox.clone(), backups),
            cwd: sandbox.root().to_path_buf(),
            project: ProjectContext::default(),
            project_type: None,
            stats: SessionStats::default(),
            modifications: Vec::new(),
            last_query: None,
            last_response: None,
            auto_context: config.auto_context,
            next_run_id: 1,
            sandbox,
            backend,
            config,
        };
        session.reload_project_context();
        Ok(session)
    }

    /// Swaps the reference extraction strategy.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Box<dyn ReferenceExtractor + Send>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Runs one full turn: auto-load, prompt, stream, record.
    ///
    /// A backend failure returns [`AssistantError::BackendFailure`] and leaves
    /// history untouched. An interrupted turn keeps whatever text arrived.
    pub fn ask(
        &mut self,
        message: &str,
        cwd: &Path,
        sink: &mut dyn StreamSink,
        cancel: CancelSignal,
        progress: Option<ProgressGuard>,
    ) -> Result<TurnOutcome, AssistantError> {
        let cwd = self.sandbox.check(cwd)?;
        self.last_query = Some(message.to_string());
        self.stats.queries += 1;

        let auto_loaded = if self.auto_context {
            self.auto_load_references(message, &cwd)
        } else {
            Vec::new()
        };

        let run_id = self.next_run_id;
        self.next_run_id += 1;
        let turn = TurnContext {
            cwd: &cwd,
            project_type: detect_project_type(&cwd),
            project: &self.project,
        };
        let request = self.assembler.build(run_id, message, &turn, &self.store);
        self.stats.prompt_chars += request.prompt_chars() as u64;
        tracing::debug!(run_id, messages = request.messages.len(), "sending generation request");

        let mut stream = ResponseStream::new(self.config.repetition.clone(), cancel);
        if let Some(progress) = progress {
            stream = stream.with_progress(progress);
        }
        let backend = Arc::clone(&self.backend);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            stream.consume(backend.as_ref(), request, sink)
        }))
        .map_err(|_| AssistantError::BackendFailure("generation backend panicked".to_string()))?;

        self.stats.tokens_generated += outcome.stats.tokens as u64;
        if let StopReason::Failed(error) = &outcome.stop {
            tracing::warn!(run_id, error = %error, "generation failed");
            return Err(AssistantError::BackendFailure(error.clone()));
        }

        let response = outcome.text.trim().to_string();
        let interrupted_empty = outcome.stop == StopReason::Interrupted && response.is_empty();
        if !interrupted_empty {
            let user_tag = if auto_loaded.is_empty() {
                MessageTag::Conversation
            } else {
                MessageTag::AutoLoad
            };
            let reply_tag = if response.contains(FILE_BLOCK_MARKER) {
                MessageTag::FileEdit
            } else {
                MessageTag::Conversation
            };
            self.store.append(Role::User, message, user_tag);
            self.store.append(Role::Assistant, response.clone(), reply_tag);
        }
        self.last_response = Some(response.clone());

        Ok(TurnOutcome {
            response,
            stop: outcome.stop,
            stats: outcome.stats,
            auto_loaded,
        })
    }

    fn auto_load_references(&mut self, message: &str, cwd: &Path) -> Vec<String> {
        let mut loaded = Vec::new();
        for path in self.extractor.extract(message, cwd) {
            if self.store.is_loaded(&path) {
                continue;
            }
            match self.loader.auto_load(&self.sandbox, &path) {
                Ok(Some(file)) => {
                    if matches!(file.body(), FileBody::Text(_)) {
                        self.stats.files_auto_loaded += 1;
                    }
                    loaded.push(file.display().to_string());
                    self.store.upsert_file(file);
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::debug!(path = %path.display(), error = %error, "auto-load skipped");
                }
            }
        }
        loaded
    }

    /// Loads `file[:start[-end]]` into context on explicit request.
    pub fn open_file(&mut self, target: &str) -> Result<LoadedFile, AssistantError> {
        let (file, range) = parse_open_target(target);
        let path = self.sandbox.resolve_checked(file, &self.cwd)?;
        let loaded = self.loader.open(&self.sandbox, &path, range)?;
        self.store.append(
            Role::User,
            format!("[Opened file: {}]", loaded.display()),
            MessageTag::FileOpen,
        );
        self.store.upsert_file(loaded.clone());
        Ok(loaded)
    }

    #[must_use]
    pub fn extract_file_intents(&self, response: &str) -> Vec<FileIntent> {
        edit_protocol::extract_file_intents(response)
    }

    /// Reviews and applies `intents`, then refreshes the affected context.
    pub fn apply_changes(
        &mut self,
        intents: &[FileIntent],
        cwd: &Path,
        reviewer: &mut dyn ChangeReviewer,
    ) -> BatchOutcome {
        let outcome = self.applier.apply(intents, cwd, reviewer);
        for change in &outcome.applied {
            self.stats.files_modified += 1;
            self.modifications.push(Modification {
                path: change.path.clone(),
                display: change.display.clone(),
                backup: change.backup.clone(),
            });
            match LoadedFile::new(
                &self.sandbox,
                &change.path,
                FileBody::Text(change.content.clone()),
                false,
                change.content.len() as u64,
            ) {
                Ok(file) => self.store.upsert_file(file),
                Err(error) => tracing::warn!(error = %error, "written file not reloaded"),
            }
        }
        outcome
    }

    /// Saves a generic code block under `name`, adding an extension when missing.
    pub fn save_code_block(
        &mut self,
        block: &CodeBlock,
        name: &str,
        cwd: &Path,
        reviewer: &mut dyn ChangeReviewer,
    ) -> BatchOutcome {
        let mut path = name.trim().to_string();
        if !path.contains('.') {
            path.push_str(suggested_extension(&block.lang));
        }
        let intent = FileIntent {
            path,
            content: block.content.clone(),
        };
        self.apply_changes(std::slice::from_ref(&intent), cwd, reviewer)
    }

    /// Replaces the first (or every) occurrence of `old` in `target`.
    ///
    /// The rewritten file goes through the same review, backup, and context
    /// refresh as a model edit.
    pub fn replace_in_file(
        &mut self,
        target: &str,
        old: &str,
        new: &str,
        all: bool,
        reviewer: &mut dyn ChangeReviewer,
    ) -> Result<Replacement, AssistantError> {
        let path = self.sandbox.resolve_checked(target, &self.cwd)?;
        let display = self.sandbox.display(&path);
        let content = fs::read_to_string(&path)
            .map_err(|source| AssistantError::io("reading file for replace", &path, source))?;
        let found = if old.is_empty() {
            0
        } else {
            content.matches(old).count()
        };
        if found == 0 {
            return Err(AssistantError::TextNotFound { display });
        }

        let (updated, replaced) = if all {
            (content.replace(old, new), found)
        } else {
            (content.replacen(old, new, 1), 1)
        };
        let intent = FileIntent {
            path: path.to_string_lossy().into_owned(),
            content: updated,
        };
        let cwd = self.cwd.clone();
        let batch = self.apply_changes(std::slice::from_ref(&intent), &cwd, reviewer);
        if !batch.applied.is_empty() {
            log_operation(Operation::Replace, &format!("{display}: '{old}' -> '{new}'"));
        }
        Ok(Replacement {
            display,
            found,
            replaced,
            batch,
        })
    }

    /// The change [`AssistantSession::undo_last`] would revert.
    pub fn peek_undo(&self) -> Result<(&Modification, &Backup), AssistantError> {
        let last = self
            .modifications
            .last()
            .ok_or(AssistantError::NothingToUndo)?;
        let backup = last.backup.as_ref().ok_or_else(|| AssistantError::NoBackupFor {
            display: last.display.clone(),
        })?;
        Ok((last, backup))
    }

    /// Restores the most recent modification from the backup taken before it.
    pub fn undo_last(&mut self) -> Result<Modification, AssistantError> {
        let (modification, backup) = self.peek_undo()?;
        let path = self.sandbox.check(&modification.path)?;
        self.applier.backups().restore(&backup.name, &path)?;
        let modification = modification.clone();
        self.modifications.pop();
        log_operation(Operation::Undo, &modification.display);
        self.reload_into_context(&path);
        Ok(modification)
    }

    /// Copies backup `name` over `target` (resolved against the current directory).
    pub fn restore_backup(&mut self, name: &str, target: &str) -> Result<PathBuf, AssistantError> {
        let path = self.sandbox.resolve_checked(target, &self.cwd)?;
        self.applier.backups().restore(name, &path)?;
        log_operation(
            Operation::Restore,
            &format!("{name} -> {}", self.sandbox.display(&path)),
        );
        if self.store.is_loaded(&path) {
            self.reload_into_context(&path);
        }
        Ok(path)
    }

    /// Backups newest first, optionally only those of `target`.
    pub fn list_backups(&self, target: Option<&str>) -> Result<Vec<Backup>, AssistantError> {
        let display = match target {
            Some(target) => {
                let path = self.sandbox.resolve_checked(target, &self.cwd)?;
                Some(self.sandbox.display(&path))
            }
            None => None,
        };
        Ok(self.applier.backups().list(display.as_deref())?)
    }

    fn reload_into_context(&mut self, path: &Path) {
        let loaded = read_text_prefix(path, self.config.auto_load_read_bytes).and_then(|prefix| {
            LoadedFile::new(
                &self.sandbox,
                path,
                FileBody::Text(prefix.text),
                prefix.truncated,
                prefix.size,
            )
        });
        match loaded {
            Ok(file) => self.store.upsert_file(file),
            Err(error) => tracing::warn!(path = %path.display(), error = %error, "reload failed"),
        }
    }

    /// Moves to `target`, dropping loaded files and re-reading project context.
    pub fn change_directory(&mut self, target: &str) -> Result<&Path, AssistantError> {
        let path = self.sandbox.resolve_checked(target, &self.cwd)?;
        if !path.is_dir() {
            return Err(AssistantError::io(
                "changing directory",
                &path,
                io::Error::new(io::ErrorKind::NotFound, "not a directory"),
            ));
        }
        self.cwd = path;
        self.store.clear_files();
        if let Some(project_config) = ProjectConfig::load(&self.cwd)? {
            if let Some(auto_context) = project_config.auto_context {
                self.auto_context = auto_context;
            }
        }
        self.reload_project_context();
        Ok(&self.cwd)
    }

    /// Drops loaded files and re-reads project context for the current directory.
    pub fn reload_context(&mut self) {
        self.store.clear_files();
        self.reload_project_context();
    }

    pub fn clear_files(&mut self) {
        self.store.clear_files();
    }

    pub fn clear_history(&mut self) {
        self.store.clear_history();
    }

    /// Replays saved turns into history, subject to the usual budget.
    ///
    /// Tags are kept, so restored file and project notes stay important.
    pub fn restore_history<I>(&mut self, messages: I) -> usize
    where
        I: IntoIterator<Item = (Role, String, MessageTag)>,
    {
        let mut restored = 0;
        for (role, text, tag) in messages {
            self.store.append(role, text, tag);
            restored += 1;
        }
        restored
    }

    fn reload_project_context(&mut self) {
        self.project_type = detect_project_type(&self.cwd);
        self.project = if self.auto_context {
            ProjectContext::load(&self.sandbox, &self.cwd, self.config.project_file_read_bytes)
        } else {
            ProjectContext::default()
        };
        if !self.project.is_empty() {
            let names = self.project.names().join(", ");
            tracing::info!(files = %names, "loaded project context");
            self.store.append(
                Role::User,
                format!("[Loaded project context: {names}]"),
                MessageTag::ProjectContext,
            );
        }
    }

    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    #[must_use]
    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    #[must_use]
    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    #[must_use]
    pub fn backend_profile(&self) -> BackendProfile {
        self.backend.profile()
    }

    #[must_use]
    pub fn project_type(&self) -> Option<ProjectType> {
        self.project_type
    }

    #[must_use]
    pub fn project(&self) -> &ProjectContext {
        &self.project
    }

    #[must_use]
    pub fn loaded_files(&self) -> Vec<&LoadedFile> {
        self.store.loaded_files()
    }

    #[must_use]
    pub fn history(&self) -> &[Message] {
        self.store.history()
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.store.history_len()
    }

    #[must_use]
    pub fn history_chars(&self) -> usize {
        self.store.history_chars()
    }

    #[must_use]
    pub fn file_context_chars(&self) -> usize {
        self.store
            .loaded_files()
            .iter()
            .map(|file| file.body().as_str().chars().count())
            .sum()
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    #[must_use]
    pub fn modifications(&self) -> &[Modification] {
        &self.modifications
    }

    #[must_use]
    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    #[must_use]
    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_deref()
    }

    #[must_use]
    pub fn auto_context(&self) -> bool {
        self.auto_context
    }

    pub fn set_auto_context(&mut self, enabled: bool) {
        self.auto_context = enabled;
    }

    #[must_use]
    pub fn max_tokens(&self) -> u32 {
        self.assembler.max_tokens()
    }

    /// Generation limit for the following turns.
    pub fn set_max_tokens(&mut self, max_tokens: u32) {
        self.config.max_tokens = max_tokens;
        self.assembler.set_max_tokens(max_tokens);
    }

    #[must_use]
    pub fn history_budget(&self) -> usize {
        self.store.history_budget()
    }

    /// Resizes the history budget, evicting at once if history no longer fits.
    pub fn set_history_budget(&mut self, chars: usize) -> usize {
        self.config.history_budget_chars = chars;
        let evicted = self.store.set_history_budget(chars);
        if evicted > 0 {
            tracing::debug!(chars, evicted, "history trimmed to new budget");
        }
        evicted
    }
}
