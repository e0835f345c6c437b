use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use super::sse::{decode_chunk, SseDecoder};
use super::wire::{ChatRequest, StreamChunk};
use super::{ChatTransport, ChunkStream};
use crate::error::TransportError;

const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com";
const COMPLETIONS_PATH: &str = "/api/v1/services/aigc/text-generation/generation";
const MULTIMODAL_PATH: &str = "/api/v1/services/aigc/multimodal-generation/generation";

/// DashScope generation API over HTTP. Streams use server-sent events.
pub struct DashScopeTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    completions_path: String,
}

impl DashScopeTransport {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            completions_path: COMPLETIONS_PATH.into(),
        }
    }

    /// Build from `DASHSCOPE_API_KEY` and, if set, `DASHSCOPE_BASE_URL`.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var("DASHSCOPE_API_KEY").ok()?;
        let mut transport = Self::new(key);
        if let Ok(url) = std::env::var("DASHSCOPE_BASE_URL") {
            transport = transport.with_base_url(url);
        }
        Some(transport)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_completions_path(mut self, path: impl Into<String>) -> Self {
        self.completions_path = path.into();
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Vision and speech models live on the multimodal endpoint.
    fn endpoint(&self, model: &str) -> String {
        let path = if model.contains("vl") || model.contains("tts") {
            MULTIMODAL_PATH
        } else {
            self.completions_path.as_str()
        };
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response, TransportError> {
        debug!(
            model = %request.model,
            messages = request.input.messages.len(),
            tools = request.parameters.tools.len(),
            stream = request.is_stream(),
            "dashscope request"
        );

        let mut req = self
            .client
            .post(self.endpoint(&request.model))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json");

        if request.is_stream() {
            req = req
                .header("X-DashScope-SSE", "enable")
                .header("accept", "text/event-stream");
        }
        for (name, value) in &request.http_headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .map_err(|e| TransportError::Request(e.to_string()))?;
            return Err(TransportError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp)
    }
}

#[async_trait]
impl ChatTransport for DashScopeTransport {
    async fn submit(&self, request: ChatRequest) -> Result<ChunkStream, TransportError> {
        let resp = self.send(&request).await?;
        let mut bytes = Box::pin(resp.bytes_stream());

        let chunks = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            while let Some(next) = bytes.next().await {
                match next {
                    Ok(data) => {
                        for item in decoder.feed(&data) {
                            yield item;
                        }
                    }
                    Err(e) => {
                        yield Err(TransportError::Request(e.to_string()));
                        return;
                    }
                }
            }
            if let Some(item) = decoder.finish() {
                yield item;
            }
        };

        Ok(Box::pin(chunks))
    }

    async fn submit_once(
        &self,
        request: ChatRequest,
    ) -> Result<Option<StreamChunk>, TransportError> {
        let resp = self.send(&request).await?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        if text.trim().is_empty() {
            return Ok(None);
        }

        let chunk = decode_chunk(&text)?;
        if chunk.is_error() {
            return Err(TransportError::ApiError { status, body: text });
        }
        Ok(Some(chunk))
    }
}
