use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::registry::ToolRegistry;
use crate::error::ChatError;
use crate::types::{
    AssistantMessage, ChatOptions, ChatResponse, ConversationTurn, Generation,
    GenerationMetadata, Message, MessageType, ToolDefinition, ToolResponse, ToolResponseMessage,
};

/// Finish reason stamped on generations that carry tool output returned directly.
pub const FINISH_RETURN_DIRECT: &str = "returnDirect";

/// Outcome of executing one response's tool calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecutionResult {
    /// Prior messages, the assistant message that asked for the tools, then
    /// the tool responses.
    pub conversation_history: Vec<Message>,
    pub return_direct: bool,
}

impl ToolExecutionResult {
    /// One generation per tool response in the final tool message.
    pub fn generations(&self) -> Vec<Generation> {
        let Some(Message::Tool(tool_message)) = self.conversation_history.last() else {
            return Vec::new();
        };
        tool_message
            .responses
            .iter()
            .map(|response| Generation {
                output: AssistantMessage::new(response.response_data.clone()),
                metadata: GenerationMetadata {
                    id: response.id.clone().unwrap_or_default(),
                    role: MessageType::Assistant.as_str().to_string(),
                    finish_reason: FINISH_RETURN_DIRECT.to_string(),
                    tool_name: Some(response.name.clone()),
                },
            })
            .collect()
    }
}

/// Tool resolution and execution as seen by the chat loop.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Definitions to advertise in the request for these options.
    fn resolve_tool_definitions(&self, options: &ChatOptions) -> Vec<ToolDefinition>;

    /// Run every tool call of `response` and extend `turn` with the results.
    async fn execute_tool_calls(
        &self,
        turn: &ConversationTurn,
        response: &ChatResponse,
    ) -> Result<ToolExecutionResult, ChatError>;
}

/// Executes tool calls against a [`ToolRegistry`], sequentially and in the
/// order the model issued them.
#[derive(Debug, Default)]
pub struct ToolCallingManager {
    registry: ToolRegistry,
}

impl ToolCallingManager {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

#[async_trait]
impl ToolExecutor for ToolCallingManager {
    fn resolve_tool_definitions(&self, options: &ChatOptions) -> Vec<ToolDefinition> {
        if options.tool_names.is_empty() {
            return self.registry.definitions();
        }

        let known: BTreeSet<&str> = self.registry.tool_names().into_iter().collect();
        for name in &options.tool_names {
            if !known.contains(name.as_str()) {
                warn!(tool = %name, "requested tool is not registered, skipping");
            }
        }
        self.registry
            .definitions()
            .into_iter()
            .filter(|def| options.tool_names.contains(&def.name))
            .collect()
    }

    async fn execute_tool_calls(
        &self,
        turn: &ConversationTurn,
        response: &ChatResponse,
    ) -> Result<ToolExecutionResult, ChatError> {
        let assistant = response
            .generations
            .iter()
            .find(|g| g.output.has_tool_calls())
            .map(|g| g.output.clone())
            .ok_or_else(|| ChatError::ToolExecution("no tool calls in response".into()))?;

        let context = &turn.options.tool_context;
        let mut responses = Vec::with_capacity(assistant.tool_calls.len());
        let mut return_direct = true;

        for call in &assistant.tool_calls {
            info!(tool = %call.name, id = %call.id, "executing tool");

            return_direct &= self
                .registry
                .get(&call.name)
                .is_some_and(|tool| tool.return_direct);

            let output = match parse_arguments(&call.arguments) {
                Ok(input) => self.registry.execute(&call.name, &input, context).await,
                Err(e) => Err(e),
            };
            let response_data = output.unwrap_or_else(|e| {
                warn!(tool = %call.name, error = %e, "tool returned an error");
                e
            });

            responses.push(ToolResponse {
                id: (!call.id.is_empty()).then(|| call.id.clone()),
                name: call.name.clone(),
                response_data,
            });
        }

        let mut conversation_history = turn.messages.clone();
        conversation_history.push(Message::Assistant(assistant));
        conversation_history.push(Message::Tool(ToolResponseMessage { responses }));

        Ok(ToolExecutionResult {
            conversation_history,
            return_direct,
        })
    }
}

/// Empty arguments mean no arguments.
fn parse_arguments(arguments: &str) -> Result<Value, String> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(arguments).map_err(|e| format!("invalid tool arguments: {e}"))
}
