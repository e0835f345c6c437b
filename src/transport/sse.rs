//! Server-sent event framing for streamed chat completions.

use tracing::debug;

use super::wire::StreamChunk;
use crate::error::TransportError;

/// Splits a byte stream into SSE lines and decodes each `data:` payload.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network reads decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Last status announced by a `:HTTP_STATUS/NNN` comment line.
    http_status: Option<u16>,
    events: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every chunk completed by them, in order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<StreamChunk, TransportError>> {
        self.buffer.extend_from_slice(bytes);

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(item) = self.process_line(&line) {
                out.push(item);
            }
        }
        out
    }

    /// Flush a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Option<Result<StreamChunk, TransportError>> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        self.process_line(&line)
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<Result<StreamChunk, TransportError>> {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim_end_matches(['\r', '\n']),
            Err(e) => return Some(Err(TransportError::Parse(e.to_string()))),
        };

        if line.is_empty() {
            return None;
        }

        if let Some(comment) = line.strip_prefix(':') {
            if let Some(status) = comment.trim().strip_prefix("HTTP_STATUS/") {
                self.http_status = status.trim().parse().ok();
            }
            return None;
        }

        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            debug!(events = self.events, "stream done marker");
            return None;
        }

        self.events += 1;
        Some(self.decode(data))
    }

    fn decode(&self, data: &str) -> Result<StreamChunk, TransportError> {
        let chunk = decode_chunk(data)?;
        if chunk.is_error() {
            return Err(TransportError::ApiError {
                status: self.http_status.unwrap_or(500),
                body: chunk.message.unwrap_or_else(|| data.to_string()),
            });
        }
        Ok(chunk)
    }
}

pub fn decode_chunk(data: &str) -> Result<StreamChunk, TransportError> {
    serde_json::from_str(data).map_err(|e| TransportError::Parse(e.to_string()))
}
