//! Backend contract consumed by the agent loop.

use async_trait::async_trait;

use crate::errors::ChatError;
use crate::types::{ChatReply, ChatRequest};

/// Sends a full transcript to a model and returns its reply text.
///
/// Implementations own their retry and timeout policy; an `Err` returned here is
/// final from the caller's point of view.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, request: ChatRequest) -> Result<ChatReply, ChatError>;
}
