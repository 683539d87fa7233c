/// Normalized chat completion stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatStreamEvent {
    /// Incremental assistant text.
    ContentDelta { delta: String },
    /// A choice reported its finish reason (`stop`, `length`, ...).
    Finished { reason: String },
    /// Server-side error frame.
    Error { message: String },
    /// The `[DONE]` terminator.
    Done,
}
