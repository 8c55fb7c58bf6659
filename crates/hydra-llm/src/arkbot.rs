//! ArkBot (Volcengine bot) backend.
//!
//! Same host and dialect as the Ark backend, but targets a published bot:
//! the model field carries a bot id and requests go to the `/bots` chat
//! path. No identifier in the provider registry currently resolves to this
//! variant; it is constructed directly by callers that hold a bot id.

use async_trait::async_trait;
use reqwest::{Client, header};
use std::time::Duration;

use crate::backend::{ChatBackend, with_retry};
use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse};
use crate::wire;

/// Default Ark API base URL.
const DEFAULT_ARK_BASE: &str = "https://ark.cn-beijing.volces.com/api/v3";

/// Default timeout for requests.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the ArkBot backend.
#[derive(Debug, Clone)]
pub struct ArkBotConfig {
    /// API key for authentication.
    pub api_key: String,

    /// Base URL for the API.
    pub base_url: String,

    /// Bot id to converse with.
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

impl ArkBotConfig {
    /// Create a new config with the given API key and bot id.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_ARK_BASE.to_string(),
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
// ArkBot Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Ark bot API backend.
pub struct ArkBotBackend {
    client: Client,
    config: ArkBotConfig,
}

impl ArkBotBackend {
    /// Create a new ArkBot backend with the given configuration.
    pub fn new(config: ArkBotConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/bots/chat/completions", self.config.base_url)
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
impl ChatBackend for ArkBotBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.to_wire_request(&request);

        tracing::debug!(
            backend = "arkbot",
            model = %body.model,
            messages = body.messages.len(),
            "Sending bot chat request"
        );

        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            "arkbot",
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
        "arkbot"
    }

    fn type_label(&self) -> Option<&'static str> {
        Some("ArkBot")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
