use std::future::Future;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::StreamExt;
use generation_backend::{CancelSignal, StreamControl};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};

use crate::config::HttpBackendConfig;
use crate::error::{parse_error_message, HttpBackendError};
use crate::events::ChatStreamEvent;
use crate::payload::ChatCompletionRequest;
use crate::retry::{is_retryable_http_error, retry_delay, MAX_RETRIES};
use crate::sse::SseStreamParser;
use crate::url::normalize_chat_completions_url;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How a stream ended from the client's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// `[DONE]` or a finish reason arrived.
    Completed { finish_reason: Option<String> },
    /// The handler asked to stop before the server finished.
    StoppedByHandler,
    /// The connection closed without a terminal marker.
    Eof,
}

#[derive(Debug)]
pub struct ChatCompletionsClient {
    http: Client,
    config: HttpBackendConfig,
}

impl ChatCompletionsClient {
    pub fn new(config: HttpBackendConfig) -> Result<Self, HttpBackendError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(HttpBackendError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    pub fn normalized_endpoint(&self) -> String {
        normalize_chat_completions_url(&self.config.base_url)
    }

    pub fn build_headers(&self) -> Result<HeaderMap, HttpBackendError> {
        let mut out = HeaderMap::new();
        out.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        if let Some(api_key) = self
            .config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| HttpBackendError::InvalidHeader("authorization".to_string()))?;
            out.insert(AUTHORIZATION, value);
        }

        for (key, value) in &self.config.extra_headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| HttpBackendError::InvalidHeader(format!("invalid key: {key}")))?,
                HeaderValue::from_str(value).map_err(|_| {
                    HttpBackendError::InvalidHeader(format!("invalid value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<reqwest::RequestBuilder, HttpBackendError> {
        let mut payload = request.clone();
        payload.stream = true;
        if payload.temperature.is_none() {
            payload.temperature = self.config.temperature;
        }

        Ok(self
            .http
            .post(self.normalized_endpoint())
            .headers(self.build_headers()?)
            .json(&payload))
    }

    pub async fn send_with_retry(
        &self,
        request: &ChatCompletionRequest,
        cancellation: &CancelSignal,
    ) -> Result<Response, HttpBackendError> {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if is_cancelled(cancellation) {
                return Err(HttpBackendError::Cancelled);
            }

            let response = self.build_request(request)?.send();
            let response = await_or_cancel(response, cancellation).await?;

            match response {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status);
                    let body = await_or_cancel(response.text(), cancellation)
                        .await?
                        .unwrap_or_default();
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    if attempt < MAX_RETRIES && is_retryable_http_error(status.as_u16(), &body) {
                        tracing::debug!(%status, attempt, "retrying chat completion request");
                        await_or_cancel(tokio::time::sleep(retry_delay(attempt)), cancellation)
                            .await?;
                        continue;
                    }

                    return Err(HttpBackendError::Status(status, message));
                }
                Err(error) => {
                    let message = error.to_string();
                    let transient = error.is_connect()
                        || error.is_timeout()
                        || is_retryable_http_error(0, &message);
                    last_error = Some(message);
                    if attempt < MAX_RETRIES && transient {
                        tracing::debug!(
                            attempt,
                            "retrying chat completion request after transport error"
                        );
                        await_or_cancel(tokio::time::sleep(retry_delay(attempt)), cancellation)
                            .await?;
                        continue;
                    }
                    return Err(HttpBackendError::RetryExhausted {
                        status: last_status,
                        last_error,
                    });
                }
            }
        }

        Err(HttpBackendError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    /// Streams a request, handing each normalized event to `on_event`.
    pub async fn stream_with_handler<F>(
        &self,
        request: &ChatCompletionRequest,
        cancellation: &CancelSignal,
        mut on_event: F,
    ) -> Result<StreamEnd, HttpBackendError>
    where
        F: FnMut(ChatStreamEvent) -> StreamControl,
    {
        let response = self.send_with_retry(request, cancellation).await?;
        let mut bytes = response.bytes_stream();
        let mut parser = SseStreamParser::default();
        let mut finish_reason = None;

        loop {
            let Some(chunk) = await_or_cancel(bytes.next(), cancellation).await? else {
                break;
            };
            let chunk = chunk.map_err(HttpBackendError::from)?;
            for event in parser.feed(&chunk) {
                match event {
                    ChatStreamEvent::Error { message } => {
                        return Err(HttpBackendError::StreamFailed(message));
                    }
                    ChatStreamEvent::Done => {
                        return Ok(StreamEnd::Completed { finish_reason });
                    }
                    ChatStreamEvent::Finished { ref reason } => {
                        finish_reason = Some(reason.clone());
                        on_event(event);
                    }
                    ChatStreamEvent::ContentDelta { .. } => {
                        if on_event(event) == StreamControl::Stop {
                            return Ok(StreamEnd::StoppedByHandler);
                        }
                    }
                }
            }
        }

        if is_cancelled(cancellation) {
            return Err(HttpBackendError::Cancelled);
        }

        Ok(match finish_reason {
            Some(reason) => StreamEnd::Completed {
                finish_reason: Some(reason),
            },
            None => StreamEnd::Eof,
        })
    }
}

fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::Acquire)
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: &CancelSignal,
) -> Result<F::Output, HttpBackendError>
where
    F: Future,
{
    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(HttpBackendError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(HttpBackendError::Cancelled);
            }
            return Ok(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use reqwest::header::{ACCEPT, AUTHORIZATION};

    use super::ChatCompletionsClient;
    use crate::config::HttpBackendConfig;
    use crate::error::HttpBackendError;

    #[test]
    fn headers_include_bearer_only_when_key_is_set() {
        let client = ChatCompletionsClient::new(HttpBackendConfig::default())
            .expect("client should build");
        let headers = client.build_headers().expect("headers should build");
        assert_eq!(headers.get(ACCEPT).map(|v| v.as_bytes()), Some(&b"text/event-stream"[..]));
        assert!(headers.get(AUTHORIZATION).is_none());

        let client = ChatCompletionsClient::new(HttpBackendConfig::default().with_api_key("k"))
            .expect("client should build");
        let headers = client.build_headers().expect("headers should build");
        assert_eq!(
            headers.get(AUTHORIZATION).map(|v| v.as_bytes()),
            Some(&b"Bearer k"[..])
        );
    }

    #[test]
    fn invalid_extra_header_is_rejected() {
        let config = HttpBackendConfig {
            extra_headers: BTreeMap::from([("bad key".to_string(), "v".to_string())]),
            ..HttpBackendConfig::default()
        };
        let client = ChatCompletionsClient::new(config).expect("client should build");
        assert!(matches!(
            client.build_headers(),
            Err(HttpBackendError::InvalidHeader(_))
        ));
    }

    #[test]
    fn endpoint_is_normalized_from_base_url() {
        let client = ChatCompletionsClient::new(
            HttpBackendConfig::default().with_base_url("http://localhost:9000/v1/"),
        )
        .expect("client should build");
        assert_eq!(
            client.normalized_endpoint(),
            "http://localhost:9000/v1/chat/completions"
        );
    }
}
