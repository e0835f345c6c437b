use serde_json::Value;
use tracing::{debug, warn};

use super::reconstruct::ToolCallReconstructor;
use super::FINISH_TOOL_CALLS;
use crate::error::TransportError;
use crate::transport::wire::{
    ChoiceDelta, MediaPart, MessageContent, StreamChunk, ToolCallFragment,
};
use crate::types::{
    AssistantMessage, ChatResponse, Generation, GenerationMetadata, Media, ResponseMetadata,
    ToolCall,
};

/// Turns each decoded chunk of one streamed turn into a `ChatResponse`.
///
/// Holds the per-turn state: the tool-call index map and the role, which
/// the provider only sends on the first delta.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    model: String,
    tool_calls: ToolCallReconstructor,
    role: Option<String>,
}

impl StreamAssembler {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Assemble one transport item. An undecodable chunk degrades to an empty
    /// response so the rest of the turn still flows; any other transport
    /// failure is returned.
    pub fn push(
        &mut self,
        item: Result<StreamChunk, TransportError>,
    ) -> Result<ChatResponse, TransportError> {
        match item {
            Ok(chunk) => Ok(self.assemble(&chunk)),
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "dropping undecodable chunk");
                Ok(ChatResponse::empty())
            }
            Err(e) => Err(e),
        }
    }

    pub fn assemble(&mut self, chunk: &StreamChunk) -> ChatResponse {
        let id = chunk.id.clone().unwrap_or_default();
        let generations = chunk
            .choices()
            .unwrap_or_default()
            .iter()
            .map(|choice| self.generation(&id, choice))
            .collect();

        ChatResponse {
            generations,
            metadata: ResponseMetadata {
                id,
                model: self.model.clone(),
                usage: chunk.usage().unwrap_or_default(),
                rate_limit: None,
            },
        }
    }

    fn generation(&mut self, id: &str, choice: &ChoiceDelta) -> Generation {
        let delta = choice.message.as_ref();

        if let Some(fragments) = delta.and_then(|m| m.tool_calls.as_deref()) {
            self.tool_calls.merge_all(fragments);
        }
        if self.role.is_none() {
            self.role = delta.and_then(|m| m.role.clone());
        }

        let finish_reason = choice.finish_reason().to_string();
        // Deltas seen before the terminal chunk may be speculative.
        let tool_calls = if finish_reason == FINISH_TOOL_CALLS {
            let calls = self.tool_calls.snapshot();
            debug!(calls = calls.len(), "tool calls complete");
            calls
        } else {
            Vec::new()
        };

        let (text, media) = flatten_content(delta.and_then(|m| m.content.as_ref()));
        Generation {
            output: AssistantMessage {
                text,
                media,
                tool_calls,
            },
            metadata: GenerationMetadata {
                id: id.to_string(),
                role: self.role.clone().unwrap_or_default(),
                finish_reason,
                tool_name: None,
            },
        }
    }
}

/// Map a complete (non-streaming) body straight to a response. Tool calls
/// arrive whole, so they are mapped one to one and attached regardless of
/// finish reason.
pub fn assemble_complete(chunk: Option<StreamChunk>, model: &str) -> ChatResponse {
    let Some(chunk) = chunk else {
        warn!(model, "no chat completion returned");
        return ChatResponse::empty();
    };

    let id = chunk.id.clone().unwrap_or_default();
    let metadata = ResponseMetadata {
        id: id.clone(),
        model: model.to_string(),
        usage: chunk.usage().unwrap_or_default(),
        rate_limit: None,
    };

    let Some(choices) = chunk.choices() else {
        warn!(model, id = %id, "no choices returned");
        return ChatResponse {
            generations: Vec::new(),
            metadata,
        };
    };

    let generations = choices
        .iter()
        .map(|choice| {
            let delta = choice.message.as_ref();
            let tool_calls = delta
                .and_then(|m| m.tool_calls.as_deref())
                .unwrap_or_default()
                .iter()
                .enumerate()
                .map(|(position, call)| whole_call(position, call))
                .collect();
            let (text, media) = flatten_content(delta.and_then(|m| m.content.as_ref()));
            Generation {
                output: AssistantMessage {
                    text,
                    media,
                    tool_calls,
                },
                metadata: GenerationMetadata {
                    id: id.clone(),
                    role: delta.and_then(|m| m.role.clone()).unwrap_or_default(),
                    finish_reason: choice.finish_reason().to_string(),
                    tool_name: None,
                },
            }
        })
        .collect();

    ChatResponse {
        generations,
        metadata,
    }
}

/// A call that arrived whole. Falls back to its list position when the
/// provider leaves out the index.
fn whole_call(position: usize, call: &ToolCallFragment) -> ToolCall {
    let function = call.function.as_ref();
    ToolCall {
        index: call
            .index
            .unwrap_or_else(|| u32::try_from(position).unwrap_or(u32::MAX)),
        id: call.id.clone().unwrap_or_default(),
        call_type: call
            .call_type
            .clone()
            .unwrap_or_else(|| "function".to_string()),
        name: function.and_then(|f| f.name.clone()).unwrap_or_default(),
        arguments: function
            .and_then(|f| f.arguments.clone())
            .unwrap_or_default(),
    }
}

/// Plain text passes through. A part list yields its text parts joined by
/// newlines, with image/audio/video parts carried as media.
pub fn flatten_content(content: Option<&MessageContent>) -> (String, Vec<Media>) {
    match content {
        None => (String::new(), Vec::new()),
        Some(MessageContent::Text(text)) => (text.clone(), Vec::new()),
        Some(MessageContent::Parts(parts)) => {
            let mut texts = Vec::new();
            let mut media = Vec::new();
            for part in parts {
                match part {
                    MediaPart::Text(text) => texts.push(text.as_str()),
                    MediaPart::Image(url) => media.push(Media::url(mime_of(url, "image/*"), url)),
                    MediaPart::Audio(url) => media.push(Media::url(mime_of(url, "audio/*"), url)),
                    MediaPart::Video(Value::String(url)) => media.push(Media::url("video/*", url)),
                    MediaPart::Video(Value::Array(frames)) => media.extend(
                        frames
                            .iter()
                            .filter_map(Value::as_str)
                            .map(|url| Media::url("video/*", url)),
                    ),
                    MediaPart::Video(other) => {
                        debug!(?other, "skipping unrecognised video part");
                    }
                }
            }
            (texts.join("\n"), media)
        }
    }
}

/// MIME type of a `data:` URL, or `fallback` for anything else.
fn mime_of(url: &str, fallback: &str) -> String {
    url.strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .filter(|mime| !mime.is_empty())
        .unwrap_or(fallback)
        .to_string()
}
