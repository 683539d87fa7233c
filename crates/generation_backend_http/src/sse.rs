use serde_json::Value;

use crate::events::ChatStreamEvent;

/// Incremental parser for SSE byte streams.
///
/// Bytes are buffered until a blank-line frame separator arrives, so a
/// multi-byte character split across network chunks decodes intact.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: Vec<u8>,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ChatStreamEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some((end, separator_len)) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + separator_len).take(end).collect();
            let frame = String::from_utf8_lossy(&frame);

            let Some(payload) = extract_data_payload(&frame) else {
                continue;
            };
            if payload == "[DONE]" {
                events.push(ChatStreamEvent::Done);
                continue;
            }
            if let Ok(value) = serde_json::from_str::<Value>(&payload) {
                events.extend(map_chunk(&value));
            }
        }

        events
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<ChatStreamEvent> {
        let mut parser = Self::default();
        parser.feed(input.as_bytes())
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|window| window == b"\n\n");
    let crlf = buffer.windows(4).position(|window| window == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(lf), Some(crlf)) if crlf < lf => Some((crlf, 4)),
        (Some(lf), _) => Some((lf, 2)),
        (None, Some(crlf)) => Some((crlf, 4)),
        (None, None) => None,
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn map_chunk(value: &Value) -> Vec<ChatStreamEvent> {
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("server reported an error")
            .to_string();
        return vec![ChatStreamEvent::Error { message }];
    }

    let mut events = Vec::new();
    let Some(choices) = value.get("choices").and_then(Value::as_array) else {
        return events;
    };

    // Only the first choice is consumed; `n > 1` is never requested.
    if let Some(choice) = choices.first() {
        let delta = choice
            .get("delta")
            .and_then(|delta| delta.get("content"))
            .or_else(|| choice.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if !delta.is_empty() {
            events.push(ChatStreamEvent::ContentDelta {
                delta: delta.to_owned(),
            });
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            events.push(ChatStreamEvent::Finished {
                reason: reason.to_owned(),
            });
        }
    }

    events
}
