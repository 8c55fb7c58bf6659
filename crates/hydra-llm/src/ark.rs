//! Ark (Volcengine) backend.
//!
//! Speaks the chat-completions dialect at the Ark endpoint. Authentication
//! accepts either a ready API key or Volcengine AK/SK credentials: when the
//! API key is empty and credentials are present (explicit fields, or the
//! `VOLC_ACCESSKEY` / `VOLC_SECRETKEY` environment variables), construction
//! performs one network round trip through the credential exchange to obtain
//! the key. This is the only backend whose constructor can touch the
//! network; dropping the construction future cancels the exchange.

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

/// Environment variable holding the Volcengine access key.
const ENV_ACCESS_KEY: &str = "VOLC_ACCESSKEY";

/// Environment variable holding the Volcengine secret key.
const ENV_SECRET_KEY: &str = "VOLC_SECRETKEY";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the Ark backend.
#[derive(Debug, Clone)]
pub struct ArkConfig {
    /// API key for authentication. May be empty if AK/SK credentials are
    /// supplied instead.
    pub api_key: String,

    /// Volcengine access key, used to exchange for an API key.
    pub access_key: Option<String>,

    /// Volcengine secret key, used to exchange for an API key.
    pub secret_key: Option<String>,

    /// Region for the credential exchange. `None` uses the exchange default.
    pub region: Option<String>,

    /// Base URL for the API.
    pub base_url: String,

    /// Model (endpoint) name.
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

impl ArkConfig {
    /// Create a new config with the given API key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            access_key: None,
            secret_key: None,
            region: None,
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

    /// Set AK/SK credentials for the exchange path.
    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Resolve AK/SK credentials: explicit fields first, then environment.
    fn resolve_credentials(&self) -> Option<(String, String)> {
        if let (Some(ak), Some(sk)) = (&self.access_key, &self.secret_key) {
            return Some((ak.clone(), sk.clone()));
        }
        match (std::env::var(ENV_ACCESS_KEY), std::env::var(ENV_SECRET_KEY)) {
            (Ok(ak), Ok(sk)) if !ak.is_empty() && !sk.is_empty() => Some((ak, sk)),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ark Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Ark API backend.
pub struct ArkBackend {
    client: Client,
    config: ArkConfig,
}

impl ArkBackend {
    /// Create a new Ark backend with the given configuration.
    ///
    /// If the config carries no API key but AK/SK credentials are available,
    /// this performs the credential exchange before building the client.
    pub async fn new(mut config: ArkConfig) -> Result<Self> {
        if config.api_key.is_empty()
            && let Some((access_key, secret_key)) = config.resolve_credentials()
        {
            let mut options = hydra_veauth::ExchangeOptions::new();
            if let Some(region) = &config.region {
                options = options.with_region(region.clone());
            }

            tracing::debug!(backend = "ark", "Exchanging credentials for API key");
            config.api_key =
                hydra_veauth::get_ark_api_key(access_key, secret_key, options).await?;
        }

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
impl ChatBackend for ArkBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.to_wire_request(&request);

        tracing::debug!(
            backend = "ark",
            model = %body.model,
            messages = body.messages.len(),
            "Sending chat completions request"
        );

        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            "ark",
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
        "ark"
    }

    fn type_label(&self) -> Option<&'static str> {
        Some("Ark")
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
        let config = ArkConfig::new("key", "ep-123");
        assert_eq!(config.base_url, DEFAULT_ARK_BASE);
        assert!(config.access_key.is_none());
        assert!(config.max_tokens.is_none());
    }

    #[test]
    fn test_resolve_credentials_prefers_explicit() {
        let config = ArkConfig::new("", "ep-123").with_credentials("AK", "SK");
        assert_eq!(
            config.resolve_credentials(),
            Some(("AK".to_string(), "SK".to_string()))
        );
    }

    #[tokio::test]
    async fn test_construction_with_api_key_skips_exchange() {
        // An API key present means no credential lookup of any kind.
        let backend = ArkBackend::new(ArkConfig::new("key", "ep-123")).await.unwrap();
        assert_eq!(backend.config.api_key, "key");
        assert_eq!(backend.type_label(), Some("Ark"));
    }

    #[test]
    fn test_unset_fields_stay_off_the_wire() {
        let config = ArkConfig::new("key", "ep-123");
        let body = wire::ChatRequest {
            model: config.model.clone(),
            messages: vec![],
            max_tokens: config.max_tokens,
            max_completion_tokens: None,
            temperature: config.temperature,
            top_p: config.top_p,
            stop: config.stop.clone(),
            tools: None,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
        assert!(json.get("top_p").is_none());
    }

    #[tokio::test]
    async fn test_completions_url() {
        let backend = ArkBackend::new(ArkConfig::new("key", "ep-123")).await.unwrap();
        assert_eq!(
            backend.completions_url(),
            "https://ark.cn-beijing.volces.com/api/v3/chat/completions"
        );
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
                    "id": "cmpl-1",
                    "model": "ep-123",
                    "choices": [{
                        "message": {"role": "assistant", "content": "hi"},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 2, "completion_tokens": 1}
                }"#,
            )
            .create_async()
            .await;

        let backend = ArkBackend::new(
            ArkConfig::new("test-key", "ep-123").with_base_url(server.url()),
        )
        .await
        .unwrap();

        let response = backend
            .complete(CompletionRequest::new(vec![Message::user("Hi")]))
            .await
            .unwrap();

        assert_eq!(response.text(), "hi");
        mock.assert_async().await;
    }
}
