//! `GenerationBackend` adapter over [`ChatCompletionsClient`].
//!
//! Each run builds a current-thread tokio runtime and blocks on the stream,
//! so events are emitted on the caller's thread in server order.

use std::sync::Arc;

use generation_backend::{
    BackendInitError, BackendProfile, CancelSignal, GenerationBackend, GenerationRequest,
    RunEvent, StreamControl,
};

use crate::client::{ChatCompletionsClient, StreamEnd};
use crate::config::HttpBackendConfig;
use crate::error::HttpBackendError;
use crate::events::ChatStreamEvent;
use crate::payload::ChatCompletionRequest;

/// Stable backend identifier used for explicit startup selection.
pub const HTTP_BACKEND_ID: &str = "http";

trait StreamClient: Send + Sync {
    fn stream(
        &self,
        request: &ChatCompletionRequest,
        cancel: &CancelSignal,
        on_event: &mut dyn FnMut(ChatStreamEvent) -> StreamControl,
    ) -> Result<StreamEnd, HttpBackendError>;
}

#[derive(Debug)]
struct DefaultStreamClient {
    client: ChatCompletionsClient,
}

impl StreamClient for DefaultStreamClient {
    fn stream(
        &self,
        request: &ChatCompletionRequest,
        cancel: &CancelSignal,
        on_event: &mut dyn FnMut(ChatStreamEvent) -> StreamControl,
    ) -> Result<StreamEnd, HttpBackendError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                HttpBackendError::Runtime(format!("failed to initialize tokio runtime: {error}"))
            })?;

        runtime.block_on(self.client.stream_with_handler(request, cancel, on_event))
    }
}

/// `GenerationBackend` backed by an OpenAI-compatible chat completions server.
pub struct HttpBackend {
    model: String,
    stream_client: Arc<dyn StreamClient>,
}

impl HttpBackend {
    /// Creates a backend using real HTTP transport.
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendInitError> {
        let model = config.model.trim().to_string();
        if model.is_empty() {
            return Err(BackendInitError::new("HTTP backend requires a model id"));
        }
        let client = ChatCompletionsClient::new(config)
            .map_err(|error| BackendInitError::new(format!("HTTP backend init failed: {error}")))?;

        Ok(Self {
            model,
            stream_client: Arc::new(DefaultStreamClient { client }),
        })
    }

    #[cfg(test)]
    fn with_stream_client_for_tests(model: &str, stream_client: Arc<dyn StreamClient>) -> Self {
        Self {
            model: model.to_string(),
            stream_client,
        }
    }
}

impl GenerationBackend for HttpBackend {
    fn profile(&self) -> BackendProfile {
        BackendProfile {
            backend_id: HTTP_BACKEND_ID.to_string(),
            model_id: self.model.clone(),
        }
    }

    fn stream(
        &self,
        req: GenerationRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(RunEvent) -> StreamControl,
    ) -> Result<(), String> {
        let run_id = req.run_id;
        let request = ChatCompletionRequest::new(&self.model, req.messages, req.max_tokens);

        emit(RunEvent::Started { run_id });

        let result = self.stream_client.stream(&request, &cancel, &mut |event| match event {
            ChatStreamEvent::ContentDelta { delta } => emit(RunEvent::Chunk {
                run_id,
                text: delta,
            }),
            _ => StreamControl::Continue,
        });

        match result {
            Ok(StreamEnd::Completed { .. } | StreamEnd::StoppedByHandler) => {
                emit(RunEvent::Finished { run_id });
            }
            Ok(StreamEnd::Eof) => {
                tracing::warn!(run_id, "chat completion stream ended without terminal marker");
                emit(RunEvent::Finished { run_id });
            }
            Err(HttpBackendError::Cancelled) => {
                emit(RunEvent::Cancelled { run_id });
            }
            Err(error) => {
                emit(RunEvent::Failed {
                    run_id,
                    error: error.to_string(),
                });
            }
        }

        Ok(())
    }
}
