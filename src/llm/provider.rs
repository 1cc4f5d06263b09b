use async_trait::async_trait;

use crate::errors::WebClawResult;
use crate::llm::types::{CallConfig, ChatRequest, LlmResponse};

/// Unified LLM provider trait. All providers implement this trait.
/// New providers only need to implement this trait and register in config.toml.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches config.toml key).
    fn name(&self) -> &str;

    /// One request/response exchange. Streaming, when enabled, is an
    /// implementation detail: the full response is returned either way.
    async fn chat(&self, request: ChatRequest, cfg: &CallConfig) -> WebClawResult<LlmResponse>;
}
