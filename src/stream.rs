//! Consumes backend chunks: line flushing, end-of-turn sentinels, the
//! repetition guard, and cooperative cancellation.

use std::time::{Duration, Instant};

use generation_backend::{
    is_cancelled, CancelSignal, GenerationBackend, GenerationRequest, RunEvent, StreamControl,
};

use crate::config::RepetitionGuardConfig;
use crate::progress::ProgressGuard;

/// Chat-template markers that end the turn when a model emits them as text.
pub const END_OF_TURN_SENTINELS: &[&str] = &["<|im_end|>", "<|im_start|>", "<|eot_id|>", "</s>"];

/// Receives rendered output: whole lines (with their `\n`), then a final
/// partial line if the response did not end with one.
pub trait StreamSink {
    fn emit(&mut self, text: &str);
}

impl StreamSink for String {
    fn emit(&mut self, text: &str) {
        self.push_str(text);
    }
}

impl StreamSink for Vec<String> {
    fn emit(&mut self, text: &str) {
        self.push(text.to_string());
    }
}

/// Discards output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StreamSink for NullSink {
    fn emit(&mut self, _text: &str) {}
}

/// Buffers text until complete lines are available.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    pending: String,
    // Bytes of `pending` already handed out by `flush_partial`.
    flushed: usize,
}

impl LineBuffer {
    /// Appends `chunk` and returns every newly completed line.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            lines.push(line[self.flushed.min(line.len())..].to_string());
            self.flushed = 0;
        }
        lines
    }

    /// Returns the part of the current line not yet handed out, if any.
    pub fn flush_partial(&mut self) -> Option<String> {
        if self.pending.len() <= self.flushed {
            return None;
        }
        let partial = self.pending[self.flushed..].to_string();
        self.flushed = self.pending.len();
        Some(partial)
    }

    /// Removes up to `bytes` unflushed bytes from the end of the current line.
    fn retract(&mut self, bytes: usize) {
        let keep = self
            .pending
            .len()
            .saturating_sub(bytes)
            .max(self.flushed);
        let mut cut = keep;
        while !self.pending.is_char_boundary(cut) {
            cut += 1;
        }
        self.pending.truncate(cut);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The backend finished on its own.
    Completed,
    /// An end-of-turn sentinel appeared in the output.
    EndOfTurn,
    /// The repetition guard cut a looping response short.
    RepetitionDetected,
    /// The cancel signal was raised.
    Interrupted,
    Failed(String),
}

impl StopReason {
    /// True when the text is a usable (possibly truncated) response.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamStats {
    /// One backend chunk counts as one token.
    pub tokens: usize,
    pub elapsed: Duration,
}

impl StreamStats {
    #[must_use]
    pub fn tokens_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.tokens as f64 / seconds
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    pub text: String,
    pub stop: StopReason,
    pub stats: StreamStats,
}

/// Per-turn stream state.
pub struct ResponseStream {
    guard: RepetitionGuardConfig,
    cancel: CancelSignal,
    text: String,
    lines: LineBuffer,
    tokens: usize,
    started: Instant,
    stop: Option<StopReason>,
    progress: Option<ProgressGuard>,
}

impl ResponseStream {
    #[must_use]
    pub fn new(guard: RepetitionGuardConfig, cancel: CancelSignal) -> Self {
        Self {
            guard,
            cancel,
            text: String::new(),
            lines: LineBuffer::default(),
            tokens: 0,
            started: Instant::now(),
            stop: None,
            progress: None,
        }
    }

    /// Spinner stopped before the first output is emitted.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressGuard) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// Streams `request` through `backend` and returns the assembled response.
    pub fn consume(
        mut self,
        backend: &dyn GenerationBackend,
        request: GenerationRequest,
        sink: &mut dyn StreamSink,
    ) -> StreamOutcome {
        let cancel = self.cancel.clone();
        let result = backend.stream(request, cancel, &mut |event| self.handle_event(event, sink));
        if let Err(error) = result {
            if self.stop.is_none() {
                self.stop = Some(StopReason::Failed(error));
            }
        }
        self.finish(sink)
    }

    pub fn handle_event(&mut self, event: RunEvent, sink: &mut dyn StreamSink) -> StreamControl {
        if self.stop.is_some() {
            return StreamControl::Stop;
        }
        match event {
            RunEvent::Started { .. } => self.check_cancel(),
            RunEvent::Chunk { text, .. } => self.push_chunk(&text, sink),
            RunEvent::Finished { .. } => {
                self.stop = Some(StopReason::Completed);
                StreamControl::Stop
            }
            RunEvent::Failed { error, .. } => {
                self.stop = Some(StopReason::Failed(error));
                StreamControl::Stop
            }
            RunEvent::Cancelled { .. } => {
                self.stop = Some(StopReason::Interrupted);
                StreamControl::Stop
            }
        }
    }

    /// Accepts one chunk (one token).
    pub fn push_chunk(&mut self, chunk: &str, sink: &mut dyn StreamSink) -> StreamControl {
        if self.stop.is_some() || self.check_cancel() == StreamControl::Stop {
            return StreamControl::Stop;
        }
        self.progress = None;
        self.tokens += 1;

        let previous_len = self.text.len();
        self.text.push_str(chunk);
        if let Some(position) = self.find_sentinel(previous_len) {
            let accepted = position.max(previous_len);
            for line in self.lines.push(&self.text[previous_len..accepted]) {
                sink.emit(&line);
            }
            self.lines.retract(previous_len.saturating_sub(position));
            self.text.truncate(position);
            self.stop = Some(StopReason::EndOfTurn);
            return StreamControl::Stop;
        }

        for line in self.lines.push(chunk) {
            sink.emit(&line);
        }

        if self.tokens >= self.guard.min_tokens
            && self.guard.check_every > 0
            && self.tokens % self.guard.check_every == 0
            && detect_repetition(&self.text, &self.guard)
        {
            tracing::warn!(tokens = self.tokens, "repetition detected; stopping generation");
            self.stop = Some(StopReason::RepetitionDetected);
            return StreamControl::Stop;
        }
        StreamControl::Continue
    }

    /// Flushes the trailing partial line and reports the outcome.
    pub fn finish(mut self, sink: &mut dyn StreamSink) -> StreamOutcome {
        self.progress = None;
        if let Some(partial) = self.lines.flush_partial() {
            sink.emit(&partial);
        }
        let stop = self.stop.take().unwrap_or(StopReason::Completed);
        StreamOutcome {
            text: self.text,
            stop,
            stats: StreamStats {
                tokens: self.tokens,
                elapsed: self.started.elapsed(),
            },
        }
    }

    fn check_cancel(&mut self) -> StreamControl {
        if is_cancelled(&self.cancel) {
            self.stop = Some(StopReason::Interrupted);
            StreamControl::Stop
        } else {
            StreamControl::Continue
        }
    }

    // Earliest sentinel that ends at or after `from`, so sentinels split
    // across chunks are still found.
    fn find_sentinel(&self, from: usize) -> Option<usize> {
        END_OF_TURN_SENTINELS
            .iter()
            .filter_map(|sentinel| {
                let mut start = from.saturating_sub(sentinel.len() - 1);
                while !self.text.is_char_boundary(start) {
                    start -= 1;
                }
                self.text[start..]
                    .find(sentinel)
                    .map(|offset| start + offset)
            })
            .min()
    }
}

/// True when a trailing pattern repeats `min_repeats` times in the window.
///
/// Whitespace-only patterns are ignored so long indentation runs never trip
/// the guard.
#[must_use]
pub fn detect_repetition(text: &str, config: &RepetitionGuardConfig) -> bool {
    let window = tail_chars(text, config.window_chars);
    let window_chars = window.chars().count();
    let min_repeats = config.min_repeats.max(2);

    for pattern_chars in config.min_pattern_chars.max(1)..=config.max_pattern_chars {
        if pattern_chars * min_repeats > window_chars {
            break;
        }
        let pattern = tail_chars(window, pattern_chars);
        if pattern.trim().is_empty() {
            continue;
        }
        if window.matches(pattern).count() >= min_repeats {
            return true;
        }
    }
    false
}

fn tail_chars(text: &str, chars: usize) -> &str {
    if chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(chars - 1) {
        Some((index, _)) => &text[index..],
        None => text,
    }
}
