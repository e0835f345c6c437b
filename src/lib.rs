pub mod error;
pub mod request;
pub mod stream;
pub mod tools;
pub mod transport;
pub mod types;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use error::{ChatError, TransportError};
pub use request::{build_request, DEFAULT_MODEL};
pub use stream::{
    aggregate, assemble_complete, cumulative_usage, StreamAssembler, TrailingUsage,
    FINISH_TOOL_CALLS,
};
pub use tools::{
    DefaultToolEligibility, ToolCallingManager, ToolDef, ToolExecutionEligibility,
    ToolExecutionResult, ToolExecutor, ToolHandler, ToolRegistry,
};
pub use transport::{ChatRequest, ChatTransport, DashScopeTransport, StreamChunk};
pub use types::{
    AssistantMessage, ChatOptions, ChatResponse, ConversationTurn, Generation, Media, Message,
    ToolCall, ToolContext, ToolDefinition, Usage,
};

/// Turn-complete responses of a streamed conversation, across tool turns.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ChatResponse, ChatError>> + Send>>;

/// Chat model configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Options every call starts from. Per-call options win.
    pub default_options: ChatOptions,
    /// Upper bound on model requests per call, tool resubmissions included.
    pub max_turns: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_options: ChatOptions::new().with_model(DEFAULT_MODEL),
            max_turns: 20,
        }
    }
}

/// The chat model. Wire up a transport and a tool executor, and go.
///
/// Each call runs the tool loop: request, assemble, execute requested
/// tools, resubmit, until the model answers without tools or a tool
/// returns directly.
pub struct ChatModel {
    transport: Arc<dyn ChatTransport>,
    tools: Arc<dyn ToolExecutor>,
    eligibility: Arc<dyn ToolExecutionEligibility>,
    config: ChatConfig,
}

impl ChatModel {
    pub fn new(
        transport: impl ChatTransport + 'static,
        tools: impl ToolExecutor + 'static,
        config: ChatConfig,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            tools: Arc::new(tools),
            eligibility: Arc::new(DefaultToolEligibility),
            config,
        }
    }

    pub fn with_eligibility(mut self, eligibility: impl ToolExecutionEligibility + 'static) -> Self {
        self.eligibility = Arc::new(eligibility);
        self
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Blocking invocation. Returns the final response of the tool loop.
    pub async fn call(&self, turn: ConversationTurn) -> Result<ChatResponse, ChatError> {
        self.run_call(turn, None).await
    }

    /// Blocking invocation with cancellation support.
    pub async fn call_with_cancel(
        &self,
        turn: ConversationTurn,
        cancel: CancellationToken,
    ) -> Result<ChatResponse, ChatError> {
        self.run_call(turn, Some(cancel)).await
    }

    /// Streaming invocation. Nothing is sent until the stream is polled.
    pub fn stream(&self, turn: ConversationTurn) -> ResponseStream {
        self.run_stream(turn, None)
    }

    /// Streaming invocation with cancellation support. Dropping the stream
    /// also cancels.
    pub fn stream_with_cancel(
        &self,
        turn: ConversationTurn,
        cancel: CancellationToken,
    ) -> ResponseStream {
        self.run_stream(turn, Some(cancel))
    }

    fn prepare(&self, mut turn: ConversationTurn) -> ConversationTurn {
        turn.options = ChatOptions::merge(&turn.options, &self.config.default_options);
        turn
    }

    async fn run_call(
        &self,
        turn: ConversationTurn,
        cancel: Option<CancellationToken>,
    ) -> Result<ChatResponse, ChatError> {
        let mut turn = self.prepare(turn);
        let mut previous: Option<ChatResponse> = None;
        let mut round = 0;

        loop {
            round += 1;
            if is_cancelled(cancel.as_ref()) {
                info!(round, "chat cancelled");
                return Err(ChatError::Cancelled);
            }

            let definitions = self.tools.resolve_tool_definitions(&turn.options);
            let request = build_request(&turn, &definitions, false)?;
            let model = request.model.clone();
            info!(round, model = %model, tools = definitions.len(), "chat turn");

            let body = until_cancelled(self.transport.submit_once(request), cancel.as_ref())
                .await
                .ok_or(ChatError::Cancelled)??;

            let mut response = assemble_complete(body, &model);
            response.metadata.usage =
                cumulative_usage(Some(response.usage()), previous.as_ref());

            if !self
                .eligibility
                .is_tool_execution_required(&turn.options, &response)
            {
                info!(round, "chat finished");
                return Ok(response);
            }
            if round >= self.config.max_turns {
                warn!(max_turns = self.config.max_turns, "chat hit max turns limit");
                return Ok(response);
            }

            let result = ToolTask::spawn(Arc::clone(&self.tools), &turn, &response)
                .join(cancel.as_ref())
                .await?;
            if result.return_direct {
                info!(round, "tool result returned directly");
                return Ok(response.with_generations(result.generations()));
            }

            turn.messages = result.conversation_history;
            previous = Some(response);
        }
    }

    fn run_stream(&self, turn: ConversationTurn, cancel: Option<CancellationToken>) -> ResponseStream {
        let transport = Arc::clone(&self.transport);
        let tools = Arc::clone(&self.tools);
        let eligibility = Arc::clone(&self.eligibility);
        let max_turns = self.config.max_turns;
        let mut turn = self.prepare(turn);

        Box::pin(async_stream::stream! {
            let mut previous: Option<ChatResponse> = None;
            let mut round = 0;

            loop {
                round += 1;
                if is_cancelled(cancel.as_ref()) {
                    info!(round, "chat cancelled");
                    yield Err(ChatError::Cancelled);
                    return;
                }

                let definitions = tools.resolve_tool_definitions(&turn.options);
                let request = match build_request(&turn, &definitions, true) {
                    Ok(request) => request,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let model = request.model.clone();
                info!(round, model = %model, tools = definitions.len(), "streaming chat turn");

                let mut chunks = match until_cancelled(transport.submit(request), cancel.as_ref()).await {
                    None => {
                        yield Err(ChatError::Cancelled);
                        return;
                    }
                    Some(Err(e)) => {
                        yield Err(e.into());
                        return;
                    }
                    Some(Ok(chunks)) => chunks,
                };

                let mut assembler = StreamAssembler::new(model);
                let mut window = TrailingUsage::new();
                let mut pending: Option<(ChatResponse, ToolTask)> = None;
                let mut drained = false;

                while !drained {
                    let mut ready = Vec::new();
                    match until_cancelled(chunks.next(), cancel.as_ref()).await {
                        None => {
                            info!(round, "chat cancelled mid-stream");
                            yield Err(ChatError::Cancelled);
                            return;
                        }
                        Some(None) => {
                            ready.extend(window.finish());
                            drained = true;
                        }
                        Some(Some(item)) => match assembler.push(item) {
                            Ok(response) => ready.extend(window.push(response)),
                            Err(e) => {
                                yield Err(e.into());
                                return;
                            }
                        },
                    }

                    for mut response in ready {
                        response.metadata.usage =
                            cumulative_usage(Some(response.usage()), previous.as_ref());

                        let wants_tools = eligibility.is_tool_execution_required(&turn.options, &response)
                            && response.has_finish_reasons(&[FINISH_TOOL_CALLS]);
                        if wants_tools && pending.is_none() && round < max_turns {
                            debug!(round, "dispatching tool calls");
                            let task = ToolTask::spawn(Arc::clone(&tools), &turn, &response);
                            pending = Some((response, task));
                            continue;
                        }
                        if wants_tools {
                            let ids: Vec<&str> = response
                                .generations
                                .iter()
                                .flat_map(|g| g.output.tool_calls.iter())
                                .map(|c| c.id.as_str())
                                .collect();
                            let dispatched = pending.is_some();
                            warn!(round, max_turns, dispatched, ?ids, "tool calls left unexecuted");
                        }
                        yield Ok(response);
                    }
                }

                let (response, task) = match pending {
                    Some(pending) => pending,
                    None => {
                        info!(round, "chat finished");
                        return;
                    }
                };
                let result = match task.join(cancel.as_ref()).await {
                    Ok(result) => result,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                if result.return_direct {
                    info!(round, "tool result returned directly");
                    yield Ok(response.with_generations(result.generations()));
                    return;
                }

                turn.messages = result.conversation_history;
                previous = Some(response);
            }
        })
    }
}

/// Tool execution running beside the chunk stream. Aborted if dropped
/// before it is joined.
struct ToolTask {
    handle: JoinHandle<Result<ToolExecutionResult, ChatError>>,
}

impl ToolTask {
    fn spawn(tools: Arc<dyn ToolExecutor>, turn: &ConversationTurn, response: &ChatResponse) -> Self {
        let turn = turn.clone();
        let response = response.clone();
        Self {
            handle: tokio::spawn(async move { tools.execute_tool_calls(&turn, &response).await }),
        }
    }

    async fn join(mut self, cancel: Option<&CancellationToken>) -> Result<ToolExecutionResult, ChatError> {
        let joined = until_cancelled(&mut self.handle, cancel)
            .await
            .ok_or(ChatError::Cancelled)?;
        joined.map_err(|e| ChatError::ToolExecution(e.to_string()))?
    }
}

impl Drop for ToolTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.is_some_and(CancellationToken::is_cancelled)
}

/// `None` if `cancel` fires first.
async fn until_cancelled<F: Future>(fut: F, cancel: Option<&CancellationToken>) -> Option<F::Output> {
    match cancel {
        Some(cancel) => tokio::select! {
            out = fut => Some(out),
            _ = cancel.cancelled() => None,
        },
        None => Some(fut.await),
    }
}
