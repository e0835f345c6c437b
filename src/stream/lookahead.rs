use tracing::debug;

use crate::types::ChatResponse;

/// Two-wide window, advancing by one, over a turn's assembled responses.
///
/// Some providers report a turn's usage on an extra chunk after the
/// content-terminal one. When the next response carries usage, the held
/// response is released with that usage instead of its own. A next response
/// that carries nothing but usage is absorbed.
#[derive(Debug, Default)]
pub struct TrailingUsage {
    held: Option<ChatResponse>,
}

impl TrailingUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer the next response; returns the one that just left the window.
    pub fn push(&mut self, next: ChatResponse) -> Option<ChatResponse> {
        let Some(mut first) = self.held.take() else {
            self.held = Some(next);
            return None;
        };

        if next.metadata.usage.is_empty() {
            self.held = Some(next);
            return Some(first);
        }

        first.metadata.usage = next.metadata.usage;
        if first.metadata.rate_limit.is_none() {
            first.metadata.rate_limit = next.metadata.rate_limit.clone();
        }

        if is_usage_only(&next) {
            debug!(id = %first.metadata.id, "folded trailing usage chunk");
        } else {
            self.held = Some(next);
        }
        Some(first)
    }

    /// Release the last response at end of stream, unchanged.
    pub fn finish(&mut self) -> Option<ChatResponse> {
        self.held.take()
    }
}

/// No generation carries text, media, tool calls or a finish reason.
pub fn is_usage_only(response: &ChatResponse) -> bool {
    response.generations.iter().all(|g| {
        g.output.text.is_empty()
            && g.output.media.is_empty()
            && g.output.tool_calls.is_empty()
            && g.finish_reason().is_empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssistantMessage, Generation, GenerationMetadata, Usage};

    fn content(id: &str, text: &str, finish: &str, usage: Usage) -> ChatResponse {
        ChatResponse::empty()
            .with_generations(vec![Generation {
                output: AssistantMessage::new(text),
                metadata: GenerationMetadata {
                    id: id.into(),
                    finish_reason: finish.into(),
                    ..Default::default()
                },
            }])
            .with_usage(usage)
    }

    fn run(responses: Vec<ChatResponse>) -> Vec<ChatResponse> {
        let mut window = TrailingUsage::new();
        let mut out: Vec<ChatResponse> = responses
            .into_iter()
            .filter_map(|r| window.push(r))
            .collect();
        out.extend(window.finish());
        out
    }

    #[test]
    fn trailing_usage_chunk_is_absorbed() {
        let mut a = content("a", "Hello", "stop", Usage::default());
        a.metadata.id = "turn-a".into();
        a.metadata.model = "qwen-plus".into();
        let mut b = ChatResponse::empty().with_usage(Usage::new(9, 3, None));
        b.metadata.id = "turn-b".into();

        let out = run(vec![a, b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text(), "Hello");
        assert_eq!(out[0].usage(), &Usage::new(9, 3, None));
        assert_eq!(out[0].metadata.id, "turn-a");
        assert_eq!(out[0].metadata.model, "qwen-plus");
    }

    #[test]
    fn lone_response_passes_unchanged() {
        let a = content("a", "Hi", "stop", Usage::new(1, 1, None));
        let out = run(vec![a.clone()]);
        assert_eq!(out, vec![a]);
    }

    #[test]
    fn content_successor_with_usage_still_emitted() {
        let a = content("a", "Hel", "", Usage::default());
        let b = content("b", "lo", "stop", Usage::new(4, 2, None));

        let out = run(vec![a, b]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].usage(), &Usage::new(4, 2, None));
        assert_eq!(out[1].text(), "lo");
        assert_eq!(out[1].usage(), &Usage::new(4, 2, None));
    }

    #[test]
    fn successor_without_usage_leaves_first_alone() {
        let a = content("a", "x", "", Usage::new(2, 2, None));
        let b = content("b", "y", "stop", Usage::default());

        let out = run(vec![a.clone(), b.clone()]);
        assert_eq!(out, vec![a, b]);
    }

    #[test]
    fn order_is_preserved() {
        let texts = ["a", "b", "c", "d"];
        let out = run(texts
            .iter()
            .map(|t| content(t, t, "", Usage::default()))
            .collect());
        let seen: Vec<&str> = out.iter().map(|r| r.text()).collect();
        assert_eq!(seen, texts);
    }
}
