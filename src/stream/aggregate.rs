use futures::{Stream, StreamExt};

use crate::error::ChatError;
use crate::types::{ChatResponse, Generation};

/// Folds streamed responses into one, generation by generation.
///
/// Text is concatenated, media appended, and the latest non-empty tool
/// calls, finish reason, id and role win. Response usage is the latest
/// non-empty one, which in a tool loop is already cumulative.
#[derive(Debug, Default)]
pub struct MessageAggregator {
    response: ChatResponse,
}

impl MessageAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, response: &ChatResponse) {
        for (i, generation) in response.generations.iter().enumerate() {
            if i >= self.response.generations.len() {
                self.response.generations.push(Generation::default());
            }
            merge_generation(&mut self.response.generations[i], generation);
        }

        let meta = &mut self.response.metadata;
        if !response.metadata.id.is_empty() {
            meta.id = response.metadata.id.clone();
        }
        if !response.metadata.model.is_empty() {
            meta.model = response.metadata.model.clone();
        }
        if !response.metadata.usage.is_empty() {
            meta.usage = response.metadata.usage;
        }
        if response.metadata.rate_limit.is_some() {
            meta.rate_limit = response.metadata.rate_limit.clone();
        }
    }

    pub fn finish(self) -> ChatResponse {
        self.response
    }
}

fn merge_generation(into: &mut Generation, next: &Generation) {
    into.output.text.push_str(&next.output.text);
    into.output.media.extend(next.output.media.iter().cloned());
    if next.output.has_tool_calls() {
        into.output.tool_calls = next.output.tool_calls.clone();
    }

    let meta = &mut into.metadata;
    if !next.metadata.finish_reason.is_empty() {
        meta.finish_reason = next.metadata.finish_reason.clone();
    }
    if !next.metadata.id.is_empty() {
        meta.id = next.metadata.id.clone();
    }
    if !next.metadata.role.is_empty() {
        meta.role = next.metadata.role.clone();
    }
    if next.metadata.tool_name.is_some() {
        meta.tool_name = next.metadata.tool_name.clone();
    }
}

/// Drain a response stream into a single aggregated response.
/// Stops at the first error.
pub async fn aggregate<S>(responses: S) -> Result<ChatResponse, ChatError>
where
    S: Stream<Item = Result<ChatResponse, ChatError>>,
{
    let mut responses = std::pin::pin!(responses);
    let mut aggregator = MessageAggregator::new();
    while let Some(response) = responses.next().await {
        aggregator.push(&response?);
    }
    Ok(aggregator.finish())
}
