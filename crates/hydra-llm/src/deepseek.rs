//! DeepSeek backend.
//!
//! Speaks the chat-completions dialect at the DeepSeek API. Unlike the other
//! vendor configs, the sampling fields here are plain values with the
//! vendor's documented defaults, not `Option`s: the API treats them as
//! always-present knobs, so the config carries the defaults and callers
//! overwrite them.

use async_trait::async_trait;
use reqwest::{Client, header};
use std::time::Duration;

use crate::backend::{ChatBackend, with_retry};
use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse};
use crate::wire;

/// Default DeepSeek API base URL.
const DEFAULT_DEEPSEEK_BASE: &str = "https://api.deepseek.com";

/// Vendor default token cap.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Vendor default sampling temperature.
const DEFAULT_TEMPERATURE: f32 = 1.0;

/// Vendor default nucleus sampling parameter.
const DEFAULT_TOP_P: f32 = 1.0;

/// Default timeout for requests.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the DeepSeek backend.
#[derive(Debug, Clone)]
pub struct DeepSeekConfig {
    /// API key for authentication.
    pub api_key: String,

    /// Base URL for the API.
    pub base_url: String,

    /// Model name.
    pub model: String,

    /// Cap on generated tokens.
    pub max_tokens: u32,

    /// Sampling temperature.
    pub temperature: f32,

    /// Nucleus sampling parameter.
    pub top_p: f32,

    /// Stop sequences. Unset sends none.
    pub stop: Option<Vec<String>>,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum retries for transient errors.
    pub max_retries: u32,

    /// Initial backoff duration for retries.
    pub retry_backoff: Duration,
}

impl DeepSeekConfig {
    /// Create a new config with the given API key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_DEEPSEEK_BASE.to_string(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
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
// DeepSeek Backend
// ─────────────────────────────────────────────────────────────────────────────

/// DeepSeek API backend.
pub struct DeepSeekBackend {
    client: Client,
    config: DeepSeekConfig,
}

impl DeepSeekBackend {
    /// Create a new DeepSeek backend with the given configuration.
    pub fn new(config: DeepSeekConfig) -> Result<Self> {
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
            max_tokens: Some(self.config.max_tokens),
            max_completion_tokens: None,
            temperature: Some(self.config.temperature),
            top_p: Some(self.config.top_p),
            stop: self.config.stop.clone(),
            tools: wire::to_chat_tools(request),
            stream: false,
        }
    }
}

#[async_trait]
impl ChatBackend for DeepSeekBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.to_wire_request(&request);

        tracing::debug!(
            backend = "deepseek",
            model = %body.model,
            messages = body.messages.len(),
            "Sending chat completions request"
        );

        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            "deepseek",
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
        "deepseek"
    }

    fn type_label(&self) -> Option<&'static str> {
        Some("DeepSeek")
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
    fn test_config_carries_vendor_defaults() {
        let config = DeepSeekConfig::new("key", "deepseek-chat");
        assert_eq!(config.base_url, DEFAULT_DEEPSEEK_BASE);
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(config.top_p, DEFAULT_TOP_P);
    }

    #[test]
    fn test_wire_request_always_sends_sampling_fields() {
        let backend = DeepSeekBackend::new(DeepSeekConfig::new("key", "deepseek-chat")).unwrap();
        let body = backend.to_wire_request(&CompletionRequest::new(vec![Message::user("hi")]));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(json["temperature"], DEFAULT_TEMPERATURE);
        assert_eq!(json["top_p"], DEFAULT_TOP_P);
        assert!(json.get("max_completion_tokens").is_none());
        assert!(json.get("stop").is_none());
    }

    #[test]
    fn test_completions_url() {
        let backend = DeepSeekBackend::new(DeepSeekConfig::new("key", "deepseek-chat")).unwrap();
        assert_eq!(
            backend.completions_url(),
            "https://api.deepseek.com/chat/completions"
        );
    }
}
