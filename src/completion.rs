//! Completion-model clients.
//!
//! [`CompletionClient`] is the seam between the answer pipeline and the
//! language model. [`ChatCompletionClient`] speaks the OpenAI-compatible
//! `POST /chat/completions` protocol (DeepSeek by default) with a single
//! user message.
//!
//! There is no retry: a failed call surfaces as a [`TransportError`] and the
//! caller degrades to its apology reply.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::CompletionConfig;
use crate::error::TransportError;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, TransportError>;
}

pub struct ChatCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionClient {
    /// Build a client. A missing API key is not an error here; requests
    /// will simply be rejected by the endpoint.
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let api_key = crate::config::secret_from_env(&config.api_key_env);
        if api_key.is_none() {
            tracing::warn!(var = %config.api_key_env, "completion API key not set");
        }

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, TransportError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let mut req = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req
            .send()
            .await
            .map_err(|e| TransportError::request(&self.endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                url: self.endpoint.clone(),
                status: status.as_u16(),
                body: body_text,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TransportError::decode(&self.endpoint, e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TransportError::decode(&self.endpoint, "response has no choices"))
    }
}
