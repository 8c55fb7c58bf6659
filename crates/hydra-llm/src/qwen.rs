//! Qwen backend via DashScope's OpenAI-compatible mode.

use async_trait::async_trait;
use reqwest::{Client, header};
use std::time::Duration;

use crate::backend::{ChatBackend, with_retry};
use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse};
use crate::wire;

/// Default DashScope compatible-mode base URL.
const DEFAULT_QWEN_BASE: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Default timeout for requests.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the Qwen backend.
#[derive(Debug, Clone)]
pub struct QwenConfig {
    /// API key for authentication.
    pub api_key: String,

    /// Base URL for the API.
    pub base_url: String,

    /// Model name.
    pub model: String,

    /// Cap on generated tokens. Unset leaves the server default in place.
    pub max_tokens: Option<u32>,

    /// Sampling temperature. Unset leaves the server default in place.
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter. Unset leaves the server default in place.
    pub top_p: Option<f32>,

    /// Stop sequences. Unset sends none.
    pub stop: Option<Vec<String>>,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum retries for transient errors.
    pub max_retries: u32,

    /// Initial backoff duration for retries.
    pub retry_backoff: Duration,
}

impl QwenConfig {
    /// Create a new config with the given API key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_QWEN_BASE.to_string(),
            model: model.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Qwen Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Qwen (DashScope compatible mode) backend.
pub struct QwenBackend {
    client: Client,
    config: QwenConfig,
}

impl QwenBackend {
    /// Create a new Qwen backend with the given configuration.
    pub fn new(config: QwenConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    fn to_wire_request(&self, request: &CompletionRequest) -> wire::ChatRequest {
        wire::ChatRequest {
            model: self.config.model.clone(),
            messages: wire::to_chat_messages(request),
            max_tokens: self.config.max_tokens,
            max_completion_tokens: None,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            stop: self.config.stop.clone(),
            tools: wire::to_chat_tools(request),
            stream: false,
        }
    }
}

#[async_trait]
impl ChatBackend for QwenBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.to_wire_request(&request);

        tracing::debug!(
            backend = "qwen",
            model = %body.model,
            messages = body.messages.len(),
            "Sending chat completions request"
        );

        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            "qwen",
            || async {
                let response = self
                    .client
                    .post(self.completions_url())
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(
                        header::AUTHORIZATION,
                        format!("Bearer {}", self.config.api_key),
                    )
                    .json(&body)
                    .send()
                    .await?;

                wire::handle_response(response, &self.config.model).await
            },
        )
        .await
    }

    fn name(&self) -> &str {
        "qwen"
    }

    fn type_label(&self) -> Option<&'static str> {
        Some("Qwen")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[test]
    fn test_config_defaults() {
        let config = QwenConfig::new("key", "qwen-max");
        assert_eq!(config.base_url, DEFAULT_QWEN_BASE);
        assert!(config.max_tokens.is_none());
        assert!(config.temperature.is_none());
    }

    #[test]
    fn test_unset_fields_stay_off_the_wire() {
        let backend = QwenBackend::new(QwenConfig::new("key", "qwen-max")).unwrap();
        let body = backend.to_wire_request(&CompletionRequest::new(vec![Message::user("hi")]));

        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
        assert!(json.get("top_p").is_none());
        assert!(json.get("stop").is_none());
    }

    #[test]
    fn test_completions_url() {
        let backend = QwenBackend::new(QwenConfig::new("key", "qwen-max")).unwrap();
        assert_eq!(
            backend.completions_url(),
            "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions"
        );
    }
}
