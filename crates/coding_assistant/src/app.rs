//! The read-eval loop: slash commands, turns, and change review.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use generation_backend::CancelSignal;
use mlx_code::logging::{log_operation, Operation};
use mlx_code::{
    offerable_blocks, AssistantError, AssistantSession, BatchOutcome, BatchState, ProgressGuard,
    StopReason, StreamSink, TurnOutcome,
};

use crate::autosave::{clear_autosave, read_autosave, render_transcript, write_autosave};
use crate::commands::{parse_slash_command, ContextAction, SlashCommand, HELP_TEXT};
use crate::console::Console;
use crate::review::ConsoleReviewer;

const PROMPT: &str = ">>> ";
const CONTINUATION_PROMPT: &str = "... ";

/// Forwards streamed lines to the console as they arrive.
struct ConsoleSink<'a> {
    console: &'a mut dyn Console,
    at_line_start: bool,
}

impl StreamSink for ConsoleSink<'_> {
    fn emit(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.console.print(text);
        self.at_line_start = text.ends_with('\n');
    }
}

pub struct App<C: Console> {
    session: AssistantSession,
    console: C,
    interrupt: CancelSignal,
    autosave_dir: Option<PathBuf>,
    offer_saves: bool,
    should_exit: bool,
}

impl<C: Console> App<C> {
    /// `interrupt` is raised by Ctrl-C and lowered again before each turn.
    pub fn new(session: AssistantSession, console: C, interrupt: CancelSignal) -> Self {
        let offer_saves = console.is_interactive();
        Self {
            session,
            console,
            interrupt,
            autosave_dir: None,
            offer_saves,
            should_exit: false,
        }
    }

    /// Snapshots the conversation to `<dir>/autosave.json` after every turn.
    #[must_use]
    pub fn with_autosave(mut self, dir: impl Into<PathBuf>) -> Self {
        self.autosave_dir = Some(dir.into());
        self
    }

    /// Offers to save a reply's code block when it carries no file edits.
    #[must_use]
    pub fn with_save_offers(mut self, enabled: bool) -> Self {
        self.offer_saves = enabled;
        self
    }

    #[must_use]
    pub fn session(&self) -> &AssistantSession {
        &self.session
    }

    #[must_use]
    pub fn console(&self) -> &C {
        &self.console
    }

    #[must_use]
    pub fn should_exit(&self) -> bool {
        self.should_exit
    }

    /// Runs until `/quit` or end of input. A message ends at an empty line.
    pub fn run(&mut self) -> io::Result<()> {
        self.print_banner();
        self.offer_restore();
        let mut buffer: Vec<String> = Vec::new();

        while !self.should_exit {
            let prompt = if buffer.is_empty() {
                PROMPT
            } else {
                CONTINUATION_PROMPT
            };
            let Some(line) = self.console.read_line(prompt)? else {
                if !buffer.is_empty() {
                    let message = buffer.join("\n");
                    self.submit(&message);
                }
                break;
            };

            if buffer.is_empty() {
                if let Some(command) = parse_slash_command(&line) {
                    self.handle_command(command);
                    continue;
                }
                if line.trim().is_empty() {
                    continue;
                }
            }

            if line.trim().is_empty() {
                let message = std::mem::take(&mut buffer).join("\n");
                self.submit(&message);
            } else {
                buffer.push(line);
            }
        }

        if let Some(dir) = &self.autosave_dir {
            if let Err(error) = clear_autosave(dir) {
                tracing::warn!(error = %error, "could not clear autosave");
            }
        }
        self.console.println("Goodbye.");
        Ok(())
    }

    fn offer_restore(&mut self) {
        let Some(dir) = self.autosave_dir.clone() else {
            return;
        };
        let messages = match read_autosave(&dir) {
            Ok(Some(messages)) => messages,
            Ok(None) => return,
            Err(error) => {
                tracing::warn!(error = %error, "ignoring unreadable autosave");
                return;
            }
        };
        let question = format!(
            "Restore the previous conversation ({} messages)?",
            messages.len()
        );
        if self.console.confirm(&question) {
            let restored = self.session.restore_history(messages);
            self.console.println(&format!("Restored {restored} messages."));
        }
    }

    fn print_banner(&mut self) {
        let profile = self.session.backend_profile();
        let project = self
            .session
            .project_type()
            .map_or_else(|| "unknown".to_string(), |kind| kind.to_string());
        self.console.println(&format!(
            "mlx-code ({} / {})\nProject root: {}\nProject type: {project}\n\
             Type /help for commands.",
            profile.backend_id,
            profile.model_id,
            self.session.sandbox().root().display(),
        ));
    }

    pub fn handle_command(&mut self, command: SlashCommand) {
        match command {
            SlashCommand::Help => self.console.println(HELP_TEXT),
            SlashCommand::Quit => self.should_exit = true,
            SlashCommand::Clear => {
                self.session.clear_history();
                self.console.println("Conversation cleared.");
            }
            SlashCommand::Pwd => {
                let display = self.session.sandbox().display(self.session.cwd());
                self.console.println(&format!(
                    "{display} ({})",
                    self.session.cwd().display()
                ));
            }
            SlashCommand::Cd(target) => {
                match self.session.change_directory(&target).map(Path::to_path_buf) {
                    Ok(path) => {
                        let message = format!("Now in {}", self.session.sandbox().display(&path));
                        self.console.println(&message);
                    }
                    Err(error) => self.report(&error),
                }
            }
            SlashCommand::Open(target) => match self.session.open_file(&target) {
                Ok(file) => {
                    let note = if file.truncated() { ", truncated" } else { "" };
                    self.console.println(&format!(
                        "Loaded {} ({} bytes{note})",
                        file.display(),
                        file.size()
                    ));
                }
                Err(error) => self.report(&error),
            },
            SlashCommand::Context(action) => self.handle_context(action),
            SlashCommand::Undo => self.undo(),
            SlashCommand::Backups(target) => self.list_backups(target.as_deref()),
            SlashCommand::Restore { name, target } => {
                if !self
                    .console
                    .confirm(&format!("Restore backup {name} over {target}?"))
                {
                    self.console.println("Restore cancelled.");
                    return;
                }
                match self.session.restore_backup(&name, &target) {
                    Ok(path) => {
                        let display = self.session.sandbox().display(&path);
                        self.console.println(&format!("Restored {display} from {name}"));
                    }
                    Err(error) => self.report(&error),
                }
            }
            SlashCommand::Stats => self.print_stats(),
            SlashCommand::Last => match self.session.last_query().map(str::to_string) {
                Some(query) => self.submit(&query),
                None => self.console.println("No previous message."),
            },
            SlashCommand::Save(target) => self.save_transcript(target.as_deref()),
            SlashCommand::Replace {
                target,
                old,
                new,
                all,
            } => self.replace(&target, &old, &new, all),
            SlashCommand::Tokens(limit) => {
                self.session.set_max_tokens(limit);
                self.console.println(&format!("Max tokens: {limit}"));
            }
            SlashCommand::Ctx(chars) => {
                let evicted = self.session.set_history_budget(chars);
                let note = if evicted > 0 {
                    format!(" ({evicted} messages dropped)")
                } else {
                    String::new()
                };
                self.console
                    .println(&format!("History budget: {chars} chars{note}"));
            }
            SlashCommand::Usage(usage) => self.console.println(&format!("Usage: {usage}")),
            SlashCommand::Unknown(command) => self
                .console
                .println(&format!("Unknown command: {command}. Type /help for commands.")),
        }
    }

    fn handle_context(&mut self, action: ContextAction) {
        match action {
            ContextAction::Show => {
                let files: Vec<String> = self
                    .session
                    .loaded_files()
                    .into_iter()
                    .map(|file| file.display().to_string())
                    .collect();
                let listing = if files.is_empty() {
                    "none".to_string()
                } else {
                    files.join(", ")
                };
                let summary = format!(
                    "Auto-context: {}\nLoaded files: {listing}\nFile context: {} chars\n\
                     History: {} messages, {} chars",
                    if self.session.auto_context() { "on" } else { "off" },
                    self.session.file_context_chars(),
                    self.session.history_len(),
                    self.session.history_chars(),
                );
                self.console.println(&summary);
            }
            ContextAction::On => {
                self.session.set_auto_context(true);
                self.console.println("Auto-context enabled.");
            }
            ContextAction::Off => {
                self.session.set_auto_context(false);
                self.console.println("Auto-context disabled.");
            }
            ContextAction::Clear => {
                self.session.clear_files();
                self.console.println("Loaded files cleared.");
            }
            ContextAction::Reload => {
                self.session.reload_context();
                let names = self.session.project().names().join(", ");
                self.console.println(&format!("Project context reloaded: {names}"));
            }
            ContextAction::Invalid(arg) => self.console.println(&format!(
                "Unknown /context option '{arg}'. Use on, off, clear or reload."
            )),
        }
    }

    fn undo(&mut self) {
        let question = self.session.peek_undo().map(|(modification, backup)| {
            format!("Revert {} to backup {}?", modification.display, backup.name)
        });
        let question = match question {
            Ok(question) => question,
            Err(error) => return self.report(&error),
        };
        if !self.console.confirm(&question) {
            self.console.println("Undo cancelled.");
            return;
        }
        match self.session.undo_last() {
            Ok(modification) => self
                .console
                .println(&format!("Restored {}", modification.display)),
            Err(error) => self.report(&error),
        }
    }

    fn replace(&mut self, target: &str, old: &str, new: &str, all: bool) {
        let result = {
            let mut reviewer = ConsoleReviewer::new(&mut self.console);
            self.session
                .replace_in_file(target, old, new, all, &mut reviewer)
        };
        match result {
            Ok(replacement) => {
                self.print_batch(&replacement.batch);
                if !replacement.batch.applied.is_empty() {
                    self.console.println(&format!(
                        "Replaced {} of {} occurrence(s) in {}",
                        replacement.replaced, replacement.found, replacement.display
                    ));
                }
            }
            Err(error) => self.report(&error),
        }
    }

    fn list_backups(&mut self, target: Option<&str>) {
        match self.session.list_backups(target) {
            Ok(backups) if backups.is_empty() => self.console.println("No backups."),
            Ok(backups) => {
                for backup in backups {
                    self.console.println(&format!(
                        "{}  {} bytes  {}",
                        backup.name, backup.size, backup.timestamp
                    ));
                }
            }
            Err(error) => self.report(&error),
        }
    }

    fn print_stats(&mut self) {
        let stats = self.session.stats();
        let profile = self.session.backend_profile();
        self.console.println(&format!(
            "Backend: {} / {}\nQueries: {}\nTokens generated: {}\n\
             Prompt chars sent: {}\nFiles modified: {}\nFiles auto-loaded: {}",
            profile.backend_id,
            profile.model_id,
            stats.queries,
            stats.tokens_generated,
            stats.prompt_chars,
            stats.files_modified,
            stats.files_auto_loaded,
        ));
    }

    fn save_transcript(&mut self, target: Option<&str>) {
        let name = match target {
            Some(name) => name.to_string(),
            None => {
                let stamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |elapsed| elapsed.as_secs());
                format!("mlx-session-{stamp}.md")
            }
        };
        let path = match self
            .session
            .sandbox()
            .resolve_checked(&name, self.session.cwd())
        {
            Ok(path) => path,
            Err(error) => return self.report(&error),
        };
        let display = self.session.sandbox().display(&path);
        if path.exists() {
            self.console
                .println(&format!("{display} already exists; choose another name."));
            return;
        }

        let transcript = render_transcript(
            &self.session.backend_profile().model_id,
            self.session.history(),
        );
        match fs::write(&path, transcript) {
            Ok(()) => {
                log_operation(Operation::FileWrite, &display);
                self.console.println(&format!("Session saved to {display}"));
            }
            Err(source) => {
                log_operation(Operation::FileWriteError, &format!("{display}: {source}"));
                self.report(&AssistantError::io("saving transcript", &path, source));
            }
        }
    }

    /// Runs one turn, then reviews any edits it proposed.
    pub fn submit(&mut self, message: &str) {
        self.interrupt.store(false, Ordering::SeqCst);
        let progress = self
            .console
            .is_interactive()
            .then(|| ProgressGuard::start("Thinking...", io::stderr()));
        let cwd = self.session.cwd().to_path_buf();

        let (result, at_line_start) = {
            let mut sink = ConsoleSink {
                console: &mut self.console,
                at_line_start: true,
            };
            let result =
                self.session
                    .ask(message, &cwd, &mut sink, self.interrupt.clone(), progress);
            (result, sink.at_line_start)
        };
        if !at_line_start {
            self.console.println("");
        }

        match result {
            Ok(outcome) => {
                self.print_turn_summary(&outcome);
                self.review_response(&outcome);
            }
            Err(error) => self.report(&error),
        }

        if let Some(dir) = self.autosave_dir.clone() {
            let model = self.session.backend_profile().model_id;
            if let Err(error) = write_autosave(
                &dir,
                &model,
                self.session.sandbox().root(),
                self.session.history(),
            ) {
                tracing::warn!(error = %error, "autosave failed");
            }
        }
    }

    fn print_turn_summary(&mut self, outcome: &TurnOutcome) {
        match &outcome.stop {
            StopReason::RepetitionDetected => {
                self.console.println("[stopped: repetitive output detected]")
            }
            StopReason::Interrupted => self.console.println("[interrupted]"),
            StopReason::Completed | StopReason::EndOfTurn | StopReason::Failed(_) => {}
        }
        if !outcome.auto_loaded.is_empty() {
            self.console.println(&format!(
                "[auto-loaded: {}]",
                outcome.auto_loaded.join(", ")
            ));
        }
        self.console.println(&format!(
            "[{} tokens, {:.1} tok/s]",
            outcome.stats.tokens,
            outcome.stats.tokens_per_second()
        ));
    }

    fn review_response(&mut self, outcome: &TurnOutcome) {
        if !outcome.stop.is_usable() {
            return;
        }
        let cwd = self.session.cwd().to_path_buf();
        let intents = self.session.extract_file_intents(&outcome.response);
        if !intents.is_empty() {
            let batch = {
                let mut reviewer = ConsoleReviewer::new(&mut self.console);
                self.session.apply_changes(&intents, &cwd, &mut reviewer)
            };
            self.print_batch(&batch);
            return;
        }

        if !self.offer_saves {
            return;
        }
        let Some(block) = offerable_blocks(&outcome.response).into_iter().next() else {
            return;
        };
        if !self.console.confirm("Save this code block to a file?") {
            return;
        }
        let name = match self.console.read_line("File name: ") {
            Ok(Some(name)) if !name.trim().is_empty() => name,
            _ => return,
        };
        let batch = {
            let mut reviewer = ConsoleReviewer::new(&mut self.console);
            self.session
                .save_code_block(&block, &name, &cwd, &mut reviewer)
        };
        self.print_batch(&batch);
    }

    fn print_batch(&mut self, batch: &BatchOutcome) {
        for change in &batch.applied {
            let backup = change
                .backup
                .as_ref()
                .map_or_else(|| "new file".to_string(), |backup| format!("backup {}", backup.name));
            self.console.println(&format!(
                "Wrote {} ({} lines, {backup})",
                change.display, change.lines
            ));
        }
        for rejected in &batch.rejected {
            self.console
                .println(&format!("Skipped {}: {}", rejected.target, rejected.reason));
        }
        for failed in &batch.failed {
            self.console
                .println(&format!("Failed {}: {}", failed.target, failed.error));
        }
        if batch.state == BatchState::Cancelled {
            self.console.println("Changes cancelled.");
        }
    }

    fn report(&mut self, error: &AssistantError) {
        tracing::debug!(error = %error, "command failed");
        self.console.println(&format!("Error: {error}"));
    }
}
