use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ChatError;

/// Key/value context handed to tool handlers alongside their input.
pub type ToolContext = Map<String, Value>;

/// The four roles a conversation message can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::System => "system",
            MessageType::User => "user",
            MessageType::Assistant => "assistant",
            MessageType::Tool => "tool",
        }
    }
}

impl FromStr for MessageType {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(MessageType::System),
            "user" => Ok(MessageType::User),
            "assistant" => Ok(MessageType::Assistant),
            "tool" => Ok(MessageType::Tool),
            other => Err(ChatError::UnsupportedMessage(format!("role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaData {
    Bytes(Vec<u8>),
    Url(String),
}

/// Media attached to a user or assistant message.
#[derive(Debug, Clone, PartialEq)]
pub struct Media {
    pub mime_type: String,
    pub data: MediaData,
}

impl Media {
    pub fn bytes(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: MediaData::Bytes(data),
        }
    }

    pub fn url(mime_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: MediaData::Url(url.into()),
        }
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }
}

/// A tool call requested by the model, reconstructed from stream fragments
/// or taken whole from a non-streaming response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub index: u32,
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantMessage {
    pub text: String,
    pub media: Vec<Media>,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// The output of one tool call, correlated to the call by `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub id: Option<String>,
    pub name: String,
    pub response_data: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolResponseMessage {
    pub responses: Vec<ToolResponse>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    System { text: String },
    User { text: String, media: Vec<Media> },
    Assistant(AssistantMessage),
    Tool(ToolResponseMessage),
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Message::System { text: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Message::User {
            text: text.into(),
            media: Vec::new(),
        }
    }

    pub fn user_with_media(text: impl Into<String>, media: Vec<Media>) -> Self {
        Message::User {
            text: text.into(),
            media,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage::new(text))
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::System { .. } => MessageType::System,
            Message::User { .. } => MessageType::User,
            Message::Assistant(_) => MessageType::Assistant,
            Message::Tool(_) => MessageType::Tool,
        }
    }

    /// Parse a message from a chat-format JSON transcript entry
    /// (`{"role": ..., "content": ...}`, plus `tool_calls` / `tool_call_id`).
    pub fn from_value(value: &Value) -> Result<Message, ChatError> {
        let role = value["role"]
            .as_str()
            .ok_or_else(|| ChatError::UnsupportedMessage("message without a role".into()))?;
        let text = value["content"].as_str().unwrap_or("").to_string();

        let message = match role.parse::<MessageType>()? {
            MessageType::System => Message::System { text },
            MessageType::User => Message::User {
                text,
                media: Vec::new(),
            },
            MessageType::Assistant => {
                let tool_calls = value["tool_calls"]
                    .as_array()
                    .map(|calls| {
                        calls
                            .iter()
                            .enumerate()
                            .map(|(i, call)| ToolCall {
                                index: call["index"]
                                    .as_u64()
                                    .and_then(|index| u32::try_from(index).ok())
                                    .unwrap_or_else(|| u32::try_from(i).unwrap_or(u32::MAX)),
                                id: call["id"].as_str().unwrap_or("").to_string(),
                                call_type: call["type"].as_str().unwrap_or("function").to_string(),
                                name: call["function"]["name"].as_str().unwrap_or("").to_string(),
                                arguments: call["function"]["arguments"]
                                    .as_str()
                                    .unwrap_or("")
                                    .to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Message::Assistant(AssistantMessage {
                    text,
                    media: Vec::new(),
                    tool_calls,
                })
            }
            MessageType::Tool => Message::Tool(ToolResponseMessage {
                responses: vec![ToolResponse {
                    id: value["tool_call_id"].as_str().map(String::from),
                    name: value["name"].as_str().unwrap_or("").to_string(),
                    response_data: text,
                }],
            }),
        };
        Ok(message)
    }
}

/// Schema for a tool as advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Per-request model options plus the tool-calling policy of the loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    pub enable_thinking: Option<bool>,
    pub http_headers: BTreeMap<String, String>,
    /// Registered tools to expose. Empty means all of them.
    pub tool_names: BTreeSet<String>,
    pub tool_context: ToolContext,
    /// Run requested tools inside the loop. Defaults to true.
    pub internal_tool_execution_enabled: Option<bool>,
}

impl ChatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_tool_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_tool_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.tool_context.insert(key.into(), value);
        self
    }

    pub fn with_internal_tool_execution(mut self, enabled: bool) -> Self {
        self.internal_tool_execution_enabled = Some(enabled);
        self
    }

    pub fn is_internal_tool_execution_enabled(&self) -> bool {
        self.internal_tool_execution_enabled.unwrap_or(true)
    }

    /// Overlay `runtime` options on `defaults`. Scalars from `runtime` win,
    /// headers and tool context are merged with `runtime` taking precedence,
    /// tool names are unioned.
    pub fn merge(runtime: &ChatOptions, defaults: &ChatOptions) -> ChatOptions {
        let mut http_headers = defaults.http_headers.clone();
        http_headers.extend(runtime.http_headers.clone());

        let mut tool_context = defaults.tool_context.clone();
        for (k, v) in &runtime.tool_context {
            tool_context.insert(k.clone(), v.clone());
        }

        ChatOptions {
            model: runtime.model.clone().or_else(|| defaults.model.clone()),
            temperature: runtime.temperature.or(defaults.temperature),
            top_p: runtime.top_p.or(defaults.top_p),
            top_k: runtime.top_k.or(defaults.top_k),
            max_tokens: runtime.max_tokens.or(defaults.max_tokens),
            enable_thinking: runtime.enable_thinking.or(defaults.enable_thinking),
            http_headers,
            tool_names: runtime
                .tool_names
                .union(&defaults.tool_names)
                .cloned()
                .collect(),
            tool_context,
            internal_tool_execution_enabled: runtime
                .internal_tool_execution_enabled
                .or(defaults.internal_tool_execution_enabled),
        }
    }
}

/// One conversation as submitted to the model. Replaced, not mutated,
/// on every tool-driven resubmission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationTurn {
    pub messages: Vec<Message>,
    pub options: ChatOptions,
}

impl ConversationTurn {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            options: ChatOptions::default(),
        }
    }

    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![Message::user(prompt)])
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}

/// Token usage. Within a tool loop the numbers are cumulative across turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// `total_tokens` falls back to input + output when the provider omits it.
    pub fn new(input_tokens: u64, output_tokens: u64, total_tokens: Option<u64>) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: total_tokens.unwrap_or(input_tokens.saturating_add(output_tokens)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.total_tokens == 0
    }

    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimit {
    pub requests_limit: Option<u64>,
    pub requests_remaining: Option<u64>,
    pub tokens_limit: Option<u64>,
    pub tokens_remaining: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationMetadata {
    pub id: String,
    pub role: String,
    /// Never null; empty when the provider sent none.
    pub finish_reason: String,
    pub tool_name: Option<String>,
}

/// One assistant output unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub output: AssistantMessage,
    pub metadata: GenerationMetadata,
}

impl Generation {
    pub fn finish_reason(&self) -> &str {
        &self.metadata.finish_reason
    }

    pub fn text(&self) -> &str {
        &self.output.text
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseMetadata {
    pub id: String,
    pub model: String,
    pub usage: Usage,
    pub rate_limit: Option<RateLimit>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub generations: Vec<Generation>,
    pub metadata: ResponseMetadata,
}

impl ChatResponse {
    /// A response with no generations and blank metadata.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn result(&self) -> Option<&Generation> {
        self.generations.first()
    }

    /// Text of the first generation, or empty.
    pub fn text(&self) -> &str {
        self.result().map(Generation::text).unwrap_or("")
    }

    pub fn usage(&self) -> &Usage {
        &self.metadata.usage
    }

    pub fn has_tool_calls(&self) -> bool {
        self.generations.iter().any(|g| g.output.has_tool_calls())
    }

    /// True if any generation finished for one of `reasons`.
    pub fn has_finish_reasons(&self, reasons: &[&str]) -> bool {
        self.generations
            .iter()
            .any(|g| reasons.contains(&g.finish_reason()))
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.metadata.usage = usage;
        self
    }

    pub fn with_generations(mut self, generations: Vec<Generation>) -> Self {
        self.generations = generations;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn usage_total_defaults_to_sum() {
        let usage = Usage::new(10, 5, None);
        assert_eq!(usage.total_tokens, 15);
        assert!(!usage.is_empty());
        assert!(Usage::default().is_empty());
    }

    #[test]
    fn usage_accumulates_all_fields() {
        let mut total = Usage::new(1, 2, Some(3));
        total.accumulate(&Usage::new(10, 20, Some(30)));
        assert_eq!(total, Usage::new(11, 22, Some(33)));
    }

    #[test]
    fn usage_saturates_instead_of_overflowing() {
        let huge = Usage::new(u64::MAX, 1, None);
        assert_eq!(huge.total_tokens, u64::MAX);

        let mut total = Usage::new(u64::MAX - 1, 0, Some(u64::MAX - 1));
        total.accumulate(&Usage::new(5, 5, Some(10)));
        assert_eq!(total, Usage::new(u64::MAX, 5, Some(u64::MAX)));
    }

    #[test]
    fn merge_prefers_runtime_and_unions_tools() {
        let defaults = ChatOptions::new()
            .with_model("qwen-plus")
            .with_temperature(0.7)
            .with_header("x-a", "default")
            .with_header("x-b", "default")
            .with_tool_names(["weather"])
            .with_tool_context("tenant", json!("acme"));
        let runtime = ChatOptions::new()
            .with_temperature(0.1)
            .with_header("x-a", "runtime")
            .with_tool_names(["lights"])
            .with_tool_context("tenant", json!("globex"));

        let merged = ChatOptions::merge(&runtime, &defaults);
        assert_eq!(merged.model.as_deref(), Some("qwen-plus"));
        assert_eq!(merged.temperature, Some(0.1));
        assert_eq!(merged.http_headers["x-a"], "runtime");
        assert_eq!(merged.http_headers["x-b"], "default");
        assert_eq!(merged.tool_names.len(), 2);
        assert_eq!(merged.tool_context["tenant"], json!("globex"));
        assert!(merged.is_internal_tool_execution_enabled());
    }

    #[test]
    fn message_from_transcript_entries() {
        let assistant = Message::from_value(&json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [{
                "id": "c1",
                "type": "function",
                "function": {"name": "get_weather", "arguments": "{}"}
            }]
        }))
        .unwrap();
        match assistant {
            Message::Assistant(msg) => {
                assert_eq!(msg.tool_calls.len(), 1);
                assert_eq!(msg.tool_calls[0].name, "get_weather");
            }
            other => panic!("expected assistant, got {other:?}"),
        }

        let tool = Message::from_value(&json!({
            "role": "tool",
            "tool_call_id": "c1",
            "name": "get_weather",
            "content": "sunny"
        }))
        .unwrap();
        assert_eq!(tool.message_type(), MessageType::Tool);
    }

    #[test]
    fn out_of_range_call_index_falls_back_to_position() {
        let assistant = Message::from_value(&json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [
                {"index": 7, "id": "c1", "function": {"name": "a", "arguments": "{}"}},
                {"index": 4_294_967_296u64, "id": "c2", "function": {"name": "b", "arguments": "{}"}}
            ]
        }))
        .unwrap();
        match assistant {
            Message::Assistant(msg) => {
                assert_eq!(msg.tool_calls[0].index, 7);
                assert_eq!(msg.tool_calls[1].index, 1);
            }
            other => panic!("expected assistant, got {other:?}"),
        }
    }

    #[test]
    fn unknown_role_is_unsupported() {
        let err = Message::from_value(&json!({"role": "function", "content": "x"})).unwrap_err();
        assert!(matches!(err, ChatError::UnsupportedMessage(_)));
    }

    #[test]
    fn finish_reason_lookup() {
        let response = ChatResponse::empty().with_generations(vec![Generation {
            metadata: GenerationMetadata {
                finish_reason: "tool_calls".into(),
                ..Default::default()
            },
            ..Default::default()
        }]);
        assert!(response.has_finish_reasons(&["tool_calls"]));
        assert!(!response.has_finish_reasons(&["stop"]));
        assert!(!response.has_tool_calls());
    }
}
