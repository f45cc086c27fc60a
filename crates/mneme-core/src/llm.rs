//! ============================================================================
//! LLM Client - Chat completions for answer generation
//! ============================================================================
//! Minimal client for a Mistral-compatible chat completions API:
//! - Single-prompt completion and multi-message chat
//! - Runtime model switching for the !switch command
//! - Empty replies are treated as errors so callers never store blanks
//! ============================================================================

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default chat model
pub const DEFAULT_CHAT_MODEL: &str = "mistral-small-latest";

/// HTTP timeout for completion requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_TEMPERATURE: f32 = 0.7;

/// One message of a chat completion request
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Client for a Mistral-compatible chat completions API
pub struct ChatClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl ChatClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Switch the model used for subsequent completions
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    /// Complete a single user prompt
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        self.chat(vec![ChatMessage::user(prompt)]).await
    }

    /// Run a chat completion over the given messages
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String> {
        debug!("Requesting completion from {}", self.model);

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Completion request failed: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read completion response")?;

        if !status.is_success() {
            bail!("Completions API returned {}: {}", status, body);
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).context("Failed to parse completion response")?;

        let reply = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("Completions API returned no choices"))?;

        if reply.trim().is_empty() {
            bail!("Model returned an empty reply");
        }
        Ok(reply)
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}
