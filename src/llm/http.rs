//! OpenAI-compatible chat completion client over reqwest.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::llm::{ChatCompletionRequest, ChatCompletionResponse, LlmClient};
use crate::types::ChatMessage;

pub struct HttpLlmClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_retries: u32,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Option<Vec<WireChoice>>,
    usage: Option<WireUsage>,
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    total_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
    code: Option<String>,
}

impl HttpLlmClient {
    pub fn new(config: &Config) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.llm_timeout_secs))
            .build()
            .map_err(|e| EngineError::Internal(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.llm_base_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            max_retries: config.llm_max_retries,
        })
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    async fn send_request(
        &self,
        request: &ChatCompletionRequest,
    ) -> EngineResult<ChatCompletionResponse> {
        let wire = WireRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .json(&wire);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::LlmUnavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::LlmUnavailable(e.to_string()))?;

        if !status.is_success() {
            if let Ok(parsed) = serde_json::from_str::<WireResponse>(&body) {
                if let Some(error) = parsed.error {
                    return Err(EngineError::LlmUnavailable(format!(
                        "{} ({})",
                        error.message,
                        error.code.unwrap_or_default()
                    )));
                }
            }
            return Err(EngineError::LlmUnavailable(format!("{}: {}", status, body)));
        }

        let parsed: WireResponse = serde_json::from_str(&body)
            .map_err(|e| EngineError::LlmUnavailable(format!("unparseable response: {}", e)))?;

        if let Some(error) = parsed.error {
            return Err(EngineError::LlmUnavailable(error.message));
        }

        let reply = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .map(|c| c.message.content)
            .unwrap_or_default();
        let tokens_used = parsed.usage.map(|u| u.total_tokens).unwrap_or(0);

        Ok(ChatCompletionResponse { reply, tokens_used })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> EngineResult<ChatCompletionResponse> {
        let mut delay_ms: u64 = 500;
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match self.send_request(&request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    tracing::warn!(
                        "LLM request failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.max_retries + 1,
                        err
                    );
                    last_error = Some(err);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms * 2).min(5_000) + (rand::random::<u64>() % 250);
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| EngineError::LlmUnavailable("exhausted retries".to_string())))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
