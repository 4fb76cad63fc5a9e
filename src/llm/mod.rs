//! LLM provider contract. The engine commits to JSON-mode output where the
//! provider supports it; the response parser copes with string output
//! otherwise.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::EngineResult;
use crate::types::ChatMessage;

#[derive(Debug, Clone)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub json_mode: bool,
    /// Remaining time this call may consume; derived from the request
    /// deadline minus the post-work reserve.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ChatCompletionResponse {
    pub reply: String,
    pub tokens_used: i32,
}

/// Provider adapter: hides transport and vendor specifics.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> EngineResult<ChatCompletionResponse>;

    fn model_name(&self) -> &str;
}

pub use http::HttpLlmClient;
pub use mock::MockLlm;
