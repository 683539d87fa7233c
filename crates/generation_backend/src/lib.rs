//! Minimal backend-agnostic contract for one text-generation run.
//!
//! This crate defines only the run lifecycle shared by every backend. It
//! excludes transport details, model formats, and prompt construction.

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};

/// Identifier for one generation run.
pub type RunId = u64;

/// Shared cancellation flag for a run.
pub type CancelSignal = Arc<AtomicBool>;

/// Creates a fresh, unset cancellation flag.
#[must_use]
pub fn cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

/// Returns true once the flag has been raised.
#[must_use]
pub fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::SeqCst)
}

/// Error returned while constructing/configuring a backend before any run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInitError {
    message: String,
}

impl BackendInitError {
    /// Creates a new backend initialization error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the underlying error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BackendInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BackendInitError {}

impl From<String> for BackendInitError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for BackendInitError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Speaker of a chat message handed to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Backend-neutral chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(rename = "content")]
    pub text: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(ChatRole::System, text)
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(ChatRole::User, text)
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, text)
    }
}

/// Input required to start a generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub run_id: RunId,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

impl GenerationRequest {
    /// Total characters across every message body.
    #[must_use]
    pub fn prompt_chars(&self) -> usize {
        self.messages
            .iter()
            .map(|message| message.text.chars().count())
            .sum()
    }

    /// Flattens the request into a single role-tagged transcript.
    ///
    /// Used by backends that accept raw text instead of structured chat turns.
    #[must_use]
    pub fn to_transcript(&self) -> String {
        let mut transcript = String::new();
        for message in &self.messages {
            transcript.push_str(message.role.as_str());
            transcript.push_str(":\n");
            transcript.push_str(&message.text);
            transcript.push_str("\n\n");
        }
        transcript.push_str("assistant:\n");
        transcript
    }
}

/// Backend-emitted lifecycle event for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Started { run_id: RunId },
    Chunk { run_id: RunId, text: String },
    Finished { run_id: RunId },
    Failed { run_id: RunId, error: String },
    Cancelled { run_id: RunId },
}

impl RunEvent {
    /// Returns the run identifier associated with this event.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::Started { run_id }
            | Self::Chunk { run_id, .. }
            | Self::Finished { run_id }
            | Self::Failed { run_id, .. }
            | Self::Cancelled { run_id } => *run_id,
        }
    }

    /// Returns true when this event terminates the run lifecycle.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// What the consumer wants the backend to do after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    Continue,
    Stop,
}

/// Immutable metadata describing a generation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendProfile {
    pub backend_id: String,
    pub model_id: String,
}

/// Backend interface for executing one generation request.
pub trait GenerationBackend: Send + Sync + 'static {
    /// Returns backend/model identity metadata.
    fn profile(&self) -> BackendProfile;

    /// Executes a request and emits lifecycle events in backend order.
    ///
    /// Backends check `cancel` between chunks and stop as soon as `emit`
    /// returns [`StreamControl::Stop`]. A stop requested by the consumer ends
    /// the run with `Finished`; a raised cancel flag ends it with `Cancelled`.
    fn stream(
        &self,
        req: GenerationRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(RunEvent) -> StreamControl,
    ) -> Result<(), String>;

    /// Runs a request to completion and returns the concatenated text.
    fn generate(&self, req: GenerationRequest, cancel: CancelSignal) -> Result<String, String> {
        let mut text = String::new();
        let mut failure = None;
        self.stream(req, cancel, &mut |event| {
            match event {
                RunEvent::Chunk { text: chunk, .. } => text.push_str(&chunk),
                RunEvent::Failed { error, .. } => failure = Some(error),
                _ => {}
            }
            StreamControl::Continue
        })?;
        match failure {
            Some(error) => Err(error),
            None => Ok(text),
        }
    }
}
