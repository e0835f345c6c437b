#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("chat cancelled")]
    Cancelled,
    #[error("unsupported message: {0}")]
    UnsupportedMessage(String),
    #[error("tool response for '{tool}' is missing the id of the call it answers")]
    MissingToolCallId { tool: String },
    #[error("tool execution failed: {0}")]
    ToolExecution(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("API returned {status}: {body}")]
    ApiError { status: u16, body: String },
    /// One fragment could not be decoded. Streams recover from this per chunk.
    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl TransportError {
    /// Whether a stream can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Parse(_))
    }
}
