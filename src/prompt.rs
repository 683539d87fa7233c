//! Builds the request handed to the generation backend for one turn.

use std::path::Path;

use generation_backend::{ChatMessage, GenerationRequest, RunId};

use crate::context::{ContextStore, Role};
use crate::project::{directory_sample, ProjectContext, ProjectType};
use crate::sandbox::PathSandbox;

/// Fixed instructions sent as the start of every system message.
pub const SYSTEM_PREAMBLE: &str = "You are mlx-code, a coding assistant working inside the user's project.
You have access to the user's project files. Answer questions and help with code.

When editing files, use this format:
```file:path/to/file.py
complete file content here
```
Use relative paths. Provide COMPLETE file content, not diffs.
Do NOT use ```python or ```js for file edits, only ```file:filename.

Be concise. Use markdown. Never invent file names.";

const RULE: &str = "======================================================================";
const DIRECTORY_SAMPLE: usize = 10;
const PROJECT_FILES_SHOWN: usize = 3;
const PROJECT_FILE_PREVIEW_CHARS: usize = 500;

/// Per-turn inputs that live outside the [`ContextStore`].
#[derive(Debug, Clone, Copy)]
pub struct TurnContext<'a> {
    pub cwd: &'a Path,
    pub project_type: Option<ProjectType>,
    pub project: &'a ProjectContext,
}

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    sandbox: PathSandbox,
    max_tokens: u32,
}

impl PromptAssembler {
    #[must_use]
    pub fn new(sandbox: PathSandbox, max_tokens: u32) -> Self {
        Self {
            sandbox,
            max_tokens,
        }
    }

    #[must_use]
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn set_max_tokens(&mut self, max_tokens: u32) {
        self.max_tokens = max_tokens;
    }

    /// Directory, project type, and project-file excerpt block.
    #[must_use]
    pub fn context_summary(&self, turn: &TurnContext<'_>) -> String {
        let mut parts = vec![
            RULE.to_string(),
            format!("YOU ARE CURRENTLY IN THIS DIRECTORY: {}", turn.cwd.display()),
        ];
        if turn.cwd != self.sandbox.root() {
            parts.push(format!(
                "Project root (where mlx-code was launched): {}",
                self.sandbox.root().display()
            ));
        }

        let sample = directory_sample(turn.cwd, DIRECTORY_SAMPLE);
        if !sample.is_empty() {
            parts.push(format!("Files in current directory: {}", sample.join(", ")));
        }
        if let Some(project_type) = turn.project_type {
            parts.push(format!("Project type: {project_type}"));
        }
        parts.push(RULE.to_string());

        if !turn.project.is_empty() {
            parts.push("\nProject Configuration:".to_string());
            for file in turn.project.files().iter().take(PROJECT_FILES_SHOWN) {
                parts.push(format!("\n--- {} ---", file.name));
                let mut preview: String =
                    file.content.chars().take(PROJECT_FILE_PREVIEW_CHARS).collect();
                if file.content.chars().count() > PROJECT_FILE_PREVIEW_CHARS {
                    preview.push_str("...");
                }
                parts.push(preview);
            }
        }

        parts.join("\n")
    }

    /// System message, prioritized history, then the new user message.
    #[must_use]
    pub fn build(
        &self,
        run_id: RunId,
        user_message: &str,
        turn: &TurnContext<'_>,
        store: &ContextStore,
    ) -> GenerationRequest {
        let mut system = format!("{SYSTEM_PREAMBLE}\n\n{}", self.context_summary(turn));
        let files = store.assemble_file_context();
        if !files.is_empty() {
            system.push_str("\n\n");
            system.push_str(&files);
        }

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(store.select_for_prompt().into_iter().map(|message| {
            match message.role() {
                Role::User => ChatMessage::user(message.text()),
                Role::Assistant => ChatMessage::assistant(message.text()),
            }
        }));
        messages.push(ChatMessage::user(user_message));

        GenerationRequest {
            run_id,
            messages,
            max_tokens: self.max_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use generation_backend::ChatRole;
    use pretty_assertions::assert_eq;

    use super::{PromptAssembler, TurnContext, SYSTEM_PREAMBLE};
    use crate::config::AssistantConfig;
    use crate::context::{ContextStore, FileBody, LoadedFile, MessageTag, Role};
    use crate::project::{ProjectContext, ProjectType};
    use crate::sandbox::PathSandbox;

    #[test]
    fn request_orders_system_history_then_user() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        fs::write(dir.path().join("main.py"), "print('hi')\n").expect("write");
        let sandbox = PathSandbox::new(dir.path()).expect("sandbox should open");
        let config = AssistantConfig::new(sandbox.root());
        let mut store = ContextStore::new(&config);
        store.append(Role::User, "earlier question", MessageTag::Conversation);
        store.append(Role::Assistant, "earlier answer", MessageTag::Conversation);
        let path = sandbox.root().join("main.py");
        store.upsert_file(
            LoadedFile::new(&sandbox, &path, FileBody::Text("print('hi')\n".into()), false, 12)
                .expect("inside sandbox"),
        );

        let project = ProjectContext::default();
        let turn = TurnContext {
            cwd: sandbox.root(),
            project_type: Some(ProjectType::Python),
            project: &project,
        };
        let assembler = PromptAssembler::new(sandbox.clone(), 256);
        let request = assembler.build(9, "and now?", &turn, &store);

        assert_eq!(request.run_id, 9);
        assert_eq!(request.max_tokens, 256);
        let roles: Vec<ChatRole> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::System, ChatRole::User, ChatRole::Assistant, ChatRole::User]
        );
        let system = &request.messages[0].text;
        assert!(system.starts_with(SYSTEM_PREAMBLE));
        assert!(system.contains("Project type: python"));
        assert!(system.contains("Files in current directory: main.py"));
        assert!(system.contains("--- main.py ---\nprint('hi')"));
        assert!(!system.contains("Project root"));
        assert_eq!(request.messages[3].text, "and now?");
    }

    #[test]
    fn summary_mentions_root_when_in_subdirectory() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        fs::create_dir_all(dir.path().join("sub")).expect("mkdir");
        fs::write(dir.path().join("README.md"), "r".repeat(600)).expect("write");
        let sandbox = PathSandbox::new(dir.path()).expect("sandbox should open");
        let project = ProjectContext::load(&sandbox, sandbox.root(), 5000);
        let cwd = sandbox.root().join("sub");
        let turn = TurnContext {
            cwd: &cwd,
            project_type: None,
            project: &project,
        };

        let summary = PromptAssembler::new(sandbox.clone(), 64).context_summary(&turn);
        assert!(summary.contains("Project root (where mlx-code was launched)"));
        assert!(summary.contains(&format!("--- README.md ---\n{}...", "r".repeat(500))));
        assert!(!summary.contains("Project type"));
    }
}
