//! Deterministic mock implementation of the shared `generation_backend` contract.
//!
//! This crate contains no transport logic and is intended for offline runs and
//! end-to-end tests of the assistant pipeline.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use generation_backend::{
    BackendProfile, CancelSignal, GenerationBackend, GenerationRequest, RunEvent, StreamControl,
};

/// Stable backend identifier used for explicit startup selection.
pub const MOCK_BACKEND_ID: &str = "mock";

/// One scripted reply, consumed by one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Streams the text split into word tokens.
    Text(String),
    /// Streams each element as exactly one chunk.
    Chunks(Vec<String>),
    /// Emits `Failed` with this message after `Started`.
    Fail(String),
}

/// Deterministic mock backend used by tests and local runs.
///
/// Replies are consumed in order; once the script is exhausted the last reply
/// is repeated.
#[derive(Debug)]
pub struct MockBackend {
    script: Mutex<VecDeque<MockReply>>,
    last_reply: Mutex<Option<MockReply>>,
    requests: Mutex<Vec<GenerationRequest>>,
    token_delay: Duration,
}

impl MockBackend {
    /// Creates a mock backend with caller-provided replies and no token delay.
    #[must_use]
    pub fn new(script: Vec<MockReply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last_reply: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            token_delay: Duration::ZERO,
        }
    }

    /// Convenience for a backend that always answers with `text`.
    #[must_use]
    pub fn replying(text: impl Into<String>) -> Self {
        Self::new(vec![MockReply::Text(text.into())])
    }

    /// Sleeps this long between emitted tokens.
    #[must_use]
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Requests received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    fn next_reply(&self) -> MockReply {
        let mut script = lock_unpoisoned(&self.script);
        let mut last = lock_unpoisoned(&self.last_reply);
        if let Some(reply) = script.pop_front() {
            *last = Some(reply.clone());
            return reply;
        }
        last.clone()
            .unwrap_or_else(|| MockReply::Text(String::new()))
    }

    fn pause(&self) {
        if !self.token_delay.is_zero() {
            thread::sleep(self.token_delay);
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::replying(
            "This is the offline mock backend. Set MLX_CODE_BACKEND=http to talk to a model.\n\
             A file edit looks like this:\n\
             ```file:notes.txt\n\
             hello from the mock backend\n\
             ```\n",
        )
        .with_token_delay(Duration::from_millis(15))
    }
}

impl GenerationBackend for MockBackend {
    fn profile(&self) -> BackendProfile {
        BackendProfile {
            backend_id: MOCK_BACKEND_ID.to_string(),
            model_id: "mock".to_string(),
        }
    }

    fn stream(
        &self,
        req: GenerationRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(RunEvent) -> StreamControl,
    ) -> Result<(), String> {
        let run_id = req.run_id;
        lock_unpoisoned(&self.requests).push(req);

        emit(RunEvent::Started { run_id });

        let tokens = match self.next_reply() {
            MockReply::Fail(error) => {
                emit(RunEvent::Failed { run_id, error });
                return Ok(());
            }
            MockReply::Text(text) => split_word_tokens(&text),
            MockReply::Chunks(chunks) => chunks,
        };

        for token in tokens {
            if cancel.load(Ordering::SeqCst) {
                emit(RunEvent::Cancelled { run_id });
                return Ok(());
            }

            if emit(RunEvent::Chunk { run_id, text: token }) == StreamControl::Stop {
                emit(RunEvent::Finished { run_id });
                return Ok(());
            }
            self.pause();
        }

        if cancel.load(Ordering::SeqCst) {
            emit(RunEvent::Cancelled { run_id });
        } else {
            emit(RunEvent::Finished { run_id });
        }

        Ok(())
    }
}

/// Splits text after every space or newline, keeping the separator on the token.
#[must_use]
pub fn split_word_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut pending = String::new();
    for ch in text.chars() {
        pending.push(ch);
        if matches!(ch, ' ' | '\n') {
            tokens.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        tokens.push(pending);
    }
    tokens
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
