//! Streaming client for OpenAI-compatible chat completion servers.
//!
//! Targets local model servers such as `mlx_lm.server` or llama.cpp's
//! server, which expose `POST /v1/chat/completions` with SSE streaming. The
//! [`HttpBackend`] adapter translates that stream into the shared
//! `generation_backend` run lifecycle.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod payload;
pub mod retry;
pub mod sse;
pub mod url;

pub use backend::{HttpBackend, HTTP_BACKEND_ID};
pub use client::ChatCompletionsClient;
pub use config::HttpBackendConfig;
pub use error::HttpBackendError;
pub use events::ChatStreamEvent;
pub use payload::ChatCompletionRequest;
pub use sse::SseStreamParser;
pub use url::normalize_chat_completions_url;
