//! Context, edit, and safety core of the mlx-code assistant.
//!
//! Invariant: nothing is read or written outside the [`PathSandbox`] root, and
//! no existing file is overwritten without a prior backup.
//!
//! # Public API Overview
//! - Run turns through [`AssistantSession::ask`] against any
//!   [`generation_backend::GenerationBackend`].
//! - Recover edits with [`extract_file_intents`] and apply them through
//!   [`AssistantSession::apply_changes`] with a [`ChangeReviewer`].
//! - Budgeted history and file context live in [`ContextStore`].
//! - File mentions are discovered by a pluggable [`ReferenceExtractor`].

#![allow(clippy::too_many_arguments)]

pub mod changes;
pub mod config;
pub mod context;
pub mod edit_protocol;
pub mod error;
pub mod loader;
pub mod logging;
pub mod progress;
pub mod project;
pub mod prompt;
pub mod references;
pub mod sandbox;
pub mod session;
pub mod stream;

/// Review and apply flow.
pub use crate::changes::{
    AppliedChange, ApproveAll, BatchDecision, BatchOutcome, BatchState, ChangeApplier,
    ChangeReviewer, FailedChange, PendingChange, RejectReason, RejectedChange,
};

/// Configuration.
pub use crate::config::{AssistantConfig, EnvConfig, ProjectConfig, RepetitionGuardConfig};

/// Context storage.
pub use crate::context::{ContextStore, FileBody, LoadedFile, Message, MessageTag, Role};

/// Edit protocol parsing.
pub use crate::edit_protocol::{
    extract_file_intents, extract_generic_blocks, offerable_blocks, CodeBlock, FileIntent,
};

pub use crate::error::AssistantError;
pub use crate::progress::ProgressGuard;
pub use crate::project::{ProjectContext, ProjectType};
pub use crate::references::{HeuristicReferenceExtractor, ReferenceExtractor};
pub use crate::sandbox::PathSandbox;

/// Session facade.
pub use crate::session::{AssistantSession, Modification, Replacement, SessionStats, TurnOutcome};

/// Streaming.
pub use crate::stream::{NullSink, StopReason, StreamOutcome, StreamSink, StreamStats};
