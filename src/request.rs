use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

use crate::error::ChatError;
use crate::transport::wire::{
    ChatRequest, FunctionFragment, FunctionSpec, FunctionTool, MediaPart, MessageContent,
    RequestInput, RequestMessage, RequestParameters, ToolCallFragment,
};
use crate::types::{ConversationTurn, Media, MediaData, Message, ToolCall, ToolDefinition};

pub const DEFAULT_MODEL: &str = "qwen-plus";

/// Turn a conversation plus resolved tool definitions into a provider request.
///
/// Fails before anything is sent if a message cannot be expressed on the
/// wire, or if a tool response lacks the id of the call it answers.
pub fn build_request(
    turn: &ConversationTurn,
    tools: &[ToolDefinition],
    stream: bool,
) -> Result<ChatRequest, ChatError> {
    let mut messages = Vec::with_capacity(turn.messages.len());
    for message in &turn.messages {
        convert_message(message, &mut messages)?;
    }

    let options = &turn.options;
    Ok(ChatRequest {
        model: options
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        input: RequestInput { messages },
        parameters: RequestParameters {
            result_format: "message".into(),
            incremental_output: stream.then_some(true),
            temperature: options.temperature,
            top_p: options.top_p,
            top_k: options.top_k,
            max_tokens: options.max_tokens,
            enable_thinking: options.enable_thinking,
            tools: tools.iter().map(function_tool).collect(),
        },
        http_headers: options.http_headers.clone(),
    })
}

fn convert_message(message: &Message, out: &mut Vec<RequestMessage>) -> Result<(), ChatError> {
    let role = message.message_type().as_str().to_string();
    match message {
        Message::System { text } => out.push(plain(role, MessageContent::Text(text.clone()))),
        Message::User { text, media } => {
            out.push(plain(role, content_with_media(text, media)?));
        }
        Message::Assistant(assistant) => {
            let mut msg = plain(role, content_with_media(&assistant.text, &assistant.media)?);
            if assistant.has_tool_calls() {
                msg.tool_calls = Some(assistant.tool_calls.iter().map(tool_call_fragment).collect());
            }
            out.push(msg);
        }
        Message::Tool(tool) => {
            for response in &tool.responses {
                let id = response
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| ChatError::MissingToolCallId {
                        tool: response.name.clone(),
                    })?;
                out.push(RequestMessage {
                    role: role.clone(),
                    content: MessageContent::Text(response.response_data.clone()),
                    tool_calls: None,
                    tool_call_id: Some(id),
                    name: Some(response.name.clone()),
                });
            }
        }
    }
    Ok(())
}

fn plain(role: String, content: MessageContent) -> RequestMessage {
    RequestMessage {
        role,
        content,
        tool_calls: None,
        tool_call_id: None,
        name: None,
    }
}

/// Plain string when there is no media, otherwise a part list led by the text.
fn content_with_media(text: &str, media: &[Media]) -> Result<MessageContent, ChatError> {
    if media.is_empty() {
        return Ok(MessageContent::Text(text.to_string()));
    }

    let mut parts = Vec::with_capacity(media.len() + 1);
    if !text.is_empty() {
        parts.push(MediaPart::Text(text.to_string()));
    }
    for item in media {
        parts.push(media_part(item)?);
    }
    Ok(MessageContent::Parts(parts))
}

fn media_part(media: &Media) -> Result<MediaPart, ChatError> {
    if media.is_audio() {
        return match &media.data {
            MediaData::Bytes(bytes) => Ok(MediaPart::Audio(STANDARD.encode(bytes))),
            MediaData::Url(_) => Err(ChatError::UnsupportedMessage(format!(
                "{} media must be inline bytes",
                media.mime_type
            ))),
        };
    }

    if media.mime_type.starts_with("video/") {
        return match &media.data {
            MediaData::Url(url) => Ok(MediaPart::Video(Value::String(url.clone()))),
            MediaData::Bytes(_) => Err(ChatError::UnsupportedMessage(format!(
                "{} media must be a URL",
                media.mime_type
            ))),
        };
    }

    Ok(match &media.data {
        MediaData::Bytes(bytes) => MediaPart::Image(format!(
            "data:{};base64,{}",
            media.mime_type,
            STANDARD.encode(bytes)
        )),
        MediaData::Url(url) => MediaPart::Image(url.clone()),
    })
}

fn tool_call_fragment(call: &ToolCall) -> ToolCallFragment {
    ToolCallFragment {
        index: Some(call.index),
        id: Some(call.id.clone()),
        call_type: Some(if call.call_type.is_empty() {
            "function".to_string()
        } else {
            call.call_type.clone()
        }),
        function: Some(FunctionFragment {
            name: Some(call.name.clone()),
            arguments: Some(call.arguments.clone()),
        }),
    }
}

fn function_tool(definition: &ToolDefinition) -> FunctionTool {
    FunctionTool {
        tool_type: "function".into(),
        function: FunctionSpec {
            name: definition.name.clone(),
            description: definition.description.clone(),
            parameters: definition.input_schema.clone(),
        },
    }
}
