//! DashScope-shaped request and response bodies.
//!
//! Only the fields the reassembly pipeline reads are modelled; everything
//! else in a provider payload is ignored on decode.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Usage;

/// One decoded wire fragment (or a whole non-streaming body).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamChunk {
    #[serde(default, rename = "request_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub output: Option<ChunkOutput>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
    /// Set by the provider on error events instead of `output`.
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StreamChunk {
    pub fn choices(&self) -> Option<&[ChoiceDelta]> {
        self.output.as_ref()?.choices.as_deref()
    }

    /// Provider-reported usage, if the chunk carries any.
    pub fn usage(&self) -> Option<Usage> {
        self.usage.as_ref().map(Usage::from)
    }

    pub fn is_error(&self) -> bool {
        self.output.is_none() && self.code.as_deref().is_some_and(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChunkOutput {
    #[serde(default)]
    pub choices: Option<Vec<ChoiceDelta>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChoiceDelta {
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub message: Option<MessageDelta>,
}

impl ChoiceDelta {
    /// The finish reason with provider placeholders normalised to `""`.
    /// DashScope sends the literal string `"null"` on intermediate chunks.
    pub fn finish_reason(&self) -> &str {
        match self.finish_reason.as_deref() {
            None | Some("null") => "",
            Some(reason) => reason,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallFragment>>,
}

/// Message content is either a plain string or an ordered list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<MediaPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaPart {
    Text(String),
    Image(String),
    Audio(String),
    Video(Value),
}

/// A partial tool call as seen in one chunk. Also used, fully populated,
/// to serialise assistant tool calls back into a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    /// Absent on some whole (non-streamed) calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionFragment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

impl From<&WireUsage> for Usage {
    fn from(usage: &WireUsage) -> Self {
        Usage::new(
            usage.input_tokens.unwrap_or(0),
            usage.output_tokens.unwrap_or(0),
            usage.total_tokens,
        )
    }
}

// --- Request side ---

/// Fully-formed provider request. The transport just sends it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub input: RequestInput,
    pub parameters: RequestParameters,
    /// Extra headers for this request; not part of the body.
    #[serde(skip)]
    pub http_headers: BTreeMap<String, String>,
}

impl ChatRequest {
    pub fn is_stream(&self) -> bool {
        self.parameters.incremental_output == Some(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestInput {
    pub messages: Vec<RequestMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestMessage {
    pub role: String,
    pub content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallFragment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestParameters {
    pub result_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental_output: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_thinking: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<FunctionTool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}
