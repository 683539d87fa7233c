//! Session configuration.
//!
//! [`AssistantConfig`] is built once at startup from defaults, the optional
//! `.mlx-code.json` project file, and `MLX_CODE_*` environment variables, in
//! that order of precedence (later wins). It is then passed by value into the
//! components that need it.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::AssistantError;

/// File name of the per-project configuration file.
pub const PROJECT_CONFIG_FILE: &str = ".mlx-code.json";

/// Smallest file-context budget that still fits a truncation notice.
pub const MIN_FILE_CONTEXT_BUDGET: usize = 256;

/// Tuning for the runaway-repetition detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepetitionGuardConfig {
    /// Tokens that must be seen before any check runs.
    pub min_tokens: usize,
    /// Check cadence, in tokens.
    pub check_every: usize,
    /// Trailing characters inspected per check.
    pub window_chars: usize,
    pub min_pattern_chars: usize,
    pub max_pattern_chars: usize,
    /// Occurrences of the trailing pattern that count as a loop.
    pub min_repeats: usize,
}

impl Default for RepetitionGuardConfig {
    fn default() -> Self {
        Self {
            min_tokens: 150,
            check_every: 50,
            window_chars: 300,
            min_pattern_chars: 30,
            max_pattern_chars: 80,
            min_repeats: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantConfig {
    /// Sandbox root. Nothing outside it is read or written.
    pub root: PathBuf,
    /// Per-user state directory (logs, autosave).
    pub state_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub history_budget_chars: usize,
    pub file_context_budget_chars: usize,
    pub per_file_cap_chars: usize,
    /// Trailing messages always kept and always sent.
    pub recent_window: usize,
    /// Older file-open/edit messages added to the prompt on top of the window.
    pub max_older_important: usize,
    /// Leading characters hashed to deduplicate important messages.
    pub fingerprint_chars: usize,
    pub auto_load_max_bytes: u64,
    pub auto_load_read_bytes: usize,
    pub project_file_read_bytes: usize,
    pub search_depth: usize,
    pub max_tokens: u32,
    pub auto_context: bool,
    pub model: Option<String>,
    pub repetition: RepetitionGuardConfig,
}

impl AssistantConfig {
    /// Defaults for a session rooted at `root`, with state under `$HOME/.mlx-code`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let state_dir = default_state_dir();
        Self {
            root: root.into(),
            backup_dir: state_dir.join("backups"),
            state_dir,
            history_budget_chars: 24_000,
            file_context_budget_chars: 15_000,
            per_file_cap_chars: 3_000,
            recent_window: 8,
            max_older_important: 3,
            fingerprint_chars: 100,
            auto_load_max_bytes: 50_000,
            auto_load_read_bytes: 10_000,
            project_file_read_bytes: 5_000,
            search_depth: 3,
            max_tokens: 1024,
            auto_context: true,
            model: None,
            repetition: RepetitionGuardConfig::default(),
        }
    }

    /// Relocates state and backups under `state_dir`.
    #[must_use]
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self.backup_dir = self.state_dir.join("backups");
        self
    }

    #[must_use]
    pub fn with_history_budget(mut self, chars: usize) -> Self {
        self.history_budget_chars = chars;
        self
    }

    #[must_use]
    pub fn with_file_context_budget(mut self, chars: usize) -> Self {
        self.file_context_budget_chars = chars;
        self
    }

    /// Defaults, then the project file in `project_dir`, then the environment.
    pub fn load(root: impl Into<PathBuf>, project_dir: &Path) -> Result<Self, AssistantError> {
        let mut config = Self::new(root);
        if let Some(project) = ProjectConfig::load(project_dir)? {
            project.apply(&mut config);
        }
        EnvConfig::from_env().apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AssistantError> {
        if self.history_budget_chars == 0 {
            return Err(AssistantError::Config(
                "history budget must be at least 1 character".to_string(),
            ));
        }
        if self.file_context_budget_chars < MIN_FILE_CONTEXT_BUDGET {
            return Err(AssistantError::Config(format!(
                "file context budget must be at least {MIN_FILE_CONTEXT_BUDGET} characters"
            )));
        }
        if self.per_file_cap_chars == 0 || self.recent_window == 0 {
            return Err(AssistantError::Config(
                "per-file cap and recent window must be positive".to_string(),
            ));
        }
        let guard = &self.repetition;
        if guard.min_pattern_chars == 0
            || guard.min_pattern_chars > guard.max_pattern_chars
            || guard.check_every == 0
            || guard.min_repeats < 2
        {
            return Err(AssistantError::Config(
                "repetition guard settings are inconsistent".to_string(),
            ));
        }
        Ok(())
    }
}

/// Optional per-project overrides read from `.mlx-code.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProjectConfig {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub ctx_chars: Option<usize>,
    pub auto_context: Option<bool>,
}

impl ProjectConfig {
    /// Reads `dir/.mlx-code.json`. A missing file is `Ok(None)`; a malformed
    /// one is logged and ignored.
    pub fn load(dir: &Path) -> Result<Option<Self>, AssistantError> {
        let path = dir.join(PROJECT_CONFIG_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(AssistantError::io("reading project config", path, error)),
        };

        match serde_json::from_str::<Self>(&raw) {
            Ok(config) => Ok(Some(config)),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "ignoring malformed project config");
                Ok(None)
            }
        }
    }

    pub fn apply(&self, config: &mut AssistantConfig) {
        if let Some(model) = self.model.as_deref().filter(|model| !model.trim().is_empty()) {
            config.model = Some(model.trim().to_string());
        }
        if let Some(max_tokens) = self.max_tokens {
            config.max_tokens = max_tokens;
        }
        if let Some(ctx_chars) = self.ctx_chars {
            config.history_budget_chars = ctx_chars;
        }
        if let Some(auto_context) = self.auto_context {
            config.auto_context = auto_context;
        }
    }
}

/// `MLX_CODE_*` environment overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub home: Option<String>,
    pub ctx_chars: Option<usize>,
    pub max_tokens: Option<u32>,
    pub auto_context: Option<bool>,
    pub backend: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            home: env_string_opt("MLX_CODE_HOME"),
            ctx_chars: env_parse_opt("MLX_CODE_CTX_CHARS"),
            max_tokens: env_parse_opt("MLX_CODE_MAX_TOKENS"),
            auto_context: env_bool_opt("MLX_CODE_AUTO_CONTEXT"),
            backend: env_string_opt("MLX_CODE_BACKEND"),
            base_url: env_string_opt("MLX_CODE_BASE_URL"),
            model: env_string_opt("MLX_CODE_MODEL"),
        }
    }

    pub fn apply(&self, config: &mut AssistantConfig) {
        if let Some(home) = &self.home {
            config.state_dir = PathBuf::from(home);
            config.backup_dir = config.state_dir.join("backups");
        }
        if let Some(ctx_chars) = self.ctx_chars {
            config.history_budget_chars = ctx_chars;
        }
        if let Some(max_tokens) = self.max_tokens {
            config.max_tokens = max_tokens;
        }
        if let Some(auto_context) = self.auto_context {
            config.auto_context = auto_context;
        }
        if let Some(model) = &self.model {
            config.model = Some(model.clone());
        }
    }
}

fn default_state_dir() -> PathBuf {
    match env_string_opt("MLX_CODE_HOME") {
        Some(home) => PathBuf::from(home),
        None => env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mlx-code"),
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

fn env_parse_opt<T: FromStr>(key: &str) -> Option<T> {
    let value = env_string_opt(key)?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %value, "ignoring unparsable environment override");
            None
        }
    }
}

fn env_bool_opt(key: &str) -> Option<bool> {
    match env_string_opt(key)?.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
