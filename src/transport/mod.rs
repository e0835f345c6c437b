pub mod dashscope;
pub mod sse;
pub mod wire;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::error::TransportError;
pub use wire::{ChatRequest, StreamChunk};

/// Decoded fragments of one streamed turn, in arrival order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, TransportError>> + Send>>;

/// Pure wire access. No state, no history, no tool handling.
/// Request in, decoded chunks out.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open an incremental-output stream for `request`.
    async fn submit(&self, request: ChatRequest) -> Result<ChunkStream, TransportError>;

    /// Single blocking request. `None` when the provider returned no body.
    async fn submit_once(&self, request: ChatRequest)
        -> Result<Option<StreamChunk>, TransportError>;
}

#[async_trait]
impl ChatTransport for Box<dyn ChatTransport> {
    async fn submit(&self, request: ChatRequest) -> Result<ChunkStream, TransportError> {
        (**self).submit(request).await
    }

    async fn submit_once(
        &self,
        request: ChatRequest,
    ) -> Result<Option<StreamChunk>, TransportError> {
        (**self).submit_once(request).await
    }
}

#[async_trait]
impl<T: ChatTransport + ?Sized> ChatTransport for Arc<T> {
    async fn submit(&self, request: ChatRequest) -> Result<ChunkStream, TransportError> {
        (**self).submit(request).await
    }

    async fn submit_once(
        &self,
        request: ChatRequest,
    ) -> Result<Option<StreamChunk>, TransportError> {
        (**self).submit_once(request).await
    }
}

pub use dashscope::DashScopeTransport;
