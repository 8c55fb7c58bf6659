//! OpenAI-compatible backend.
//!
//! Serves the OpenAI API and Azure OpenAI deployments from one backend.
//! Azure mode (`by_azure`) changes the URL shape to
//! `{base}/openai/deployments/{model}/chat/completions?api-version=...` and
//! authenticates with an `api-key` header instead of a bearer token; the
//! wire dialect is otherwise identical.

use async_trait::async_trait;
use reqwest::{Client, header};
use std::time::Duration;

use crate::backend::{ChatBackend, with_retry};
use crate::error::{LlmError, Result};
use crate::types::{CompletionRequest, CompletionResponse};
use crate::wire;

/// Default OpenAI API base URL.
const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

/// Default Azure api-version query parameter.
const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";

/// Default timeout for requests.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key for authentication.
    pub api_key: String,

    /// Base URL for the API.
    pub base_url: String,

    /// Model name, or deployment name in Azure mode.
    pub model: String,

    /// Cap on generated tokens. Unset leaves the server default in place.
    pub max_completion_tokens: Option<u32>,

    /// Sampling temperature. Unset leaves the server default in place.
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter. Unset leaves the server default in place.
    pub top_p: Option<f32>,

    /// Stop sequences. Unset sends none.
    pub stop: Option<Vec<String>>,

    /// Route requests through an Azure OpenAI deployment.
    pub by_azure: bool,

    /// Azure `api-version` query parameter. Ignored unless `by_azure`.
    pub api_version: String,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum retries for transient errors.
    pub max_retries: u32,

    /// Initial backoff duration for retries.
    pub retry_backoff: Duration,
}

impl OpenAiConfig {
    /// Create a new config with the given API key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE.to_string(),
            model: model.into(),
            max_completion_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
            by_azure: false,
            api_version: DEFAULT_AZURE_API_VERSION.to_string(),
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

    /// Enable Azure deployment routing.
    pub fn with_azure(mut self) -> Self {
        self.by_azure = true;
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI Backend
// ─────────────────────────────────────────────────────────────────────────────

/// OpenAI-compatible API backend.
pub struct OpenAiBackend {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiBackend {
    /// Create a new backend with the given configuration.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Build the chat completions endpoint URL.
    fn completions_url(&self) -> String {
        if self.config.by_azure {
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.config.base_url, self.config.model, self.config.api_version
            )
        } else {
            format!("{}/chat/completions", self.config.base_url)
        }
    }

    /// Add authentication headers to a request.
    fn add_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header(header::CONTENT_TYPE, "application/json");

        if self.config.by_azure {
            builder.header("api-key", &self.config.api_key)
        } else {
            builder.header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
        }
    }

    fn to_wire_request(&self, request: &CompletionRequest) -> wire::ChatRequest {
        wire::ChatRequest {
            model: self.config.model.clone(),
            messages: wire::to_chat_messages(request),
            max_tokens: None,
            max_completion_tokens: self.config.max_completion_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            stop: self.config.stop.clone(),
            tools: wire::to_chat_tools(request),
            stream: false,
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.to_wire_request(&request);

        tracing::debug!(
            backend = %self.name(),
            model = %body.model,
            messages = body.messages.len(),
            tools = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "Sending chat completions request"
        );

        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            self.name(),
            || async {
                let response = self
                    .add_headers(self.client.post(self.completions_url()))
                    .json(&body)
                    .send()
                    .await?;

                wire::handle_response(response, &self.config.model).await
            },
        )
        .await
    }

    fn name(&self) -> &str {
        if self.config.by_azure {
            "azure-openai"
        } else {
            "openai"
        }
    }

    fn type_label(&self) -> Option<&'static str> {
        Some("OpenAI")
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
        let config = OpenAiConfig::new("key", "gpt-4o");
        assert_eq!(config.base_url, DEFAULT_OPENAI_BASE);
        assert!(!config.by_azure);
        assert!(config.max_completion_tokens.is_none());
        assert!(config.temperature.is_none());
        assert!(config.top_p.is_none());
        assert!(config.stop.is_none());
    }

    #[test]
    fn test_completions_url_plain_and_azure() {
        let backend = OpenAiBackend::new(OpenAiConfig::new("key", "gpt-4o")).unwrap();
        assert_eq!(
            backend.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );

        let backend = OpenAiBackend::new(
            OpenAiConfig::new("key", "my-deployment")
                .with_base_url("https://example.openai.azure.com")
                .with_azure(),
        )
        .unwrap();
        assert_eq!(
            backend.completions_url(),
            "https://example.openai.azure.com/openai/deployments/my-deployment/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn test_type_label_is_openai_even_for_azure() {
        let plain = OpenAiBackend::new(OpenAiConfig::new("key", "gpt-4o")).unwrap();
        let azure = OpenAiBackend::new(OpenAiConfig::new("key", "dep").with_azure()).unwrap();

        assert_eq!(plain.type_label(), Some("OpenAI"));
        assert_eq!(azure.type_label(), Some("OpenAI"));
        assert_eq!(plain.name(), "openai");
        assert_eq!(azure.name(), "azure-openai");
    }

    #[test]
    fn test_wire_request_uses_max_completion_tokens() {
        let mut config = OpenAiConfig::new("key", "gpt-4o");
        config.max_completion_tokens = Some(512);
        let backend = OpenAiBackend::new(config).unwrap();

        let body = backend.to_wire_request(&CompletionRequest::new(vec![Message::user("hi")]));
        assert_eq!(body.max_completion_tokens, Some(512));
        assert!(body.max_tokens.is_none());

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_completion_tokens"], 512);
        assert!(json.get("max_tokens").is_none());
    }

    #[tokio::test]
    async fn test_complete_round_trip() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "id": "chatcmpl-1",
                    "model": "gpt-4o",
                    "choices": [{
                        "message": {"role": "assistant", "content": "Hello!"},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 9, "completion_tokens": 2}
                }"#,
            )
            .create_async()
            .await;

        let backend = OpenAiBackend::new(
            OpenAiConfig::new("test-key", "gpt-4o").with_base_url(server.url()),
        )
        .unwrap();

        let response = backend
            .complete(CompletionRequest::new(vec![Message::user("Hi")]))
            .await
            .unwrap();

        assert_eq!(response.text(), "Hello!");
        assert_eq!(response.usage.input_tokens, 9);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_maps_auth_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error": {"message": "bad key"}}"#)
            .create_async()
            .await;

        let backend = OpenAiBackend::new(
            OpenAiConfig::new("wrong", "gpt-4o").with_base_url(server.url()),
        )
        .unwrap();

        let err = backend
            .complete(CompletionRequest::new(vec![Message::user("Hi")]))
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Auth(_)));
    }
}
