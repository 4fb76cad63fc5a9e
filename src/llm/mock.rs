//! Deterministic provider used when `MOCK_LLM` is set: echoes the last user
//! message inside a well-formed structured reply so the full pipeline can be
//! exercised without network access.

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::llm::{ChatCompletionRequest, ChatCompletionResponse, LlmClient};

pub struct MockLlm;

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> EngineResult<ChatCompletionResponse> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let tokens_used = (last_user.len() as i32 / 4).max(8);

        let reply = if request.json_mode {
            serde_json::json!({
                "reply": format!("(mock) You said: {}", last_user),
                "emotion_delta": 3,
                "intent": "SMALL_TALK",
                "thought": "echo",
                "is_nsfw": false,
            })
            .to_string()
        } else {
            format!("(mock) You said: {}", last_user)
        };

        Ok(ChatCompletionResponse { reply, tokens_used })
    }

    fn model_name(&self) -> &str {
        "mock-echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use std::time::Duration;

    #[tokio::test]
    async fn test_mock_returns_structured_json() {
        let client = MockLlm;
        let response = client
            .chat_completion(ChatCompletionRequest {
                messages: vec![ChatMessage::user("hello")],
                temperature: 0.7,
                max_tokens: 100,
                json_mode: true,
                timeout: Duration::from_secs(5),
            })
            .await
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&response.reply).unwrap();
        assert_eq!(value["intent"], "SMALL_TALK");
        assert!(response.tokens_used > 0);
    }
}
