//! Gemini backend over the `generateContent` API.
//!
//! Construction is two-step: a [`GeminiClient`] is built first from
//! credentials (the piece a cloud SDK would own), then the backend wraps it
//! together with generation parameters. The API groups sampling settings
//! under `generationConfig` and declares tools as function declarations.
//! There is no stop-sequence field in this backend's configuration.
//!
//! The wire protocol carries no tool-call ids: a `functionCall` part is
//! identified by its function name, so tool-use ids on this backend are the
//! function names themselves.

use async_trait::async_trait;
use reqwest::{Client, Response, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backend::{ChatBackend, with_retry};
use crate::error::{LlmError, RateLimitInfo, Result};
use crate::types::{
    CompletionRequest, CompletionResponse, ContentBlock, Role, StopReason, Usage,
};

/// Default API base URL.
const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Default timeout for requests.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Options for constructing a [`GeminiClient`].
#[derive(Debug, Clone)]
pub struct GeminiClientConfig {
    /// API key for authentication.
    pub api_key: String,

    /// Base URL override. `None` uses the Google default.
    pub base_url: Option<String>,

    /// Request timeout.
    pub timeout: Duration,
}

impl GeminiClientConfig {
    /// Create client options with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Authenticated handle to the Gemini API.
///
/// Built once, before the backend; the backend borrows its transport and
/// credentials from here.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    /// Create a new client from options.
    ///
    /// Fails if no API key is supplied; this backend has no anonymous mode.
    pub fn new(config: GeminiClientConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(LlmError::Config(
                "Gemini requires an API key".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key,
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        })
    }

    fn generate_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, model
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the Gemini backend.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// The pre-built API client.
    pub client: GeminiClient,

    /// Model name.
    pub model: String,

    /// Cap on generated tokens. Unset leaves the server default in place.
    pub max_tokens: Option<u32>,

    /// Sampling temperature. Unset leaves the server default in place.
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter. Unset leaves the server default in place.
    pub top_p: Option<f32>,
}

impl GeminiConfig {
    /// Create a new config over an existing client.
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Gemini Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Gemini `generateContent` backend.
pub struct GeminiBackend {
    config: GeminiConfig,
    max_retries: u32,
    retry_backoff: Duration,
}

impl GeminiBackend {
    /// Create a new Gemini backend with the given configuration.
    pub fn new(config: GeminiConfig) -> Result<Self> {
        Ok(Self {
            config,
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        })
    }

    fn to_api_request(&self, request: &CompletionRequest) -> ApiRequest {
        let contents = request
            .messages
            .iter()
            .map(|m| ApiContent {
                role: match m.role {
                    Role::User => "user".to_string(),
                    Role::Assistant => "model".to_string(),
                },
                parts: m.content.blocks().iter().map(to_part).collect(),
            })
            .collect();

        let system_instruction = request.system.as_ref().map(|s| ApiSystemInstruction {
            parts: vec![ApiPart {
                text: Some(s.clone()),
                function_call: None,
                function_response: None,
            }],
        });

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(vec![ApiToolGroup {
                function_declarations: request
                    .tools
                    .iter()
                    .map(|t| ApiFunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    })
                    .collect(),
            }])
        };

        // generationConfig is omitted entirely when nothing is set, so the
        // server keeps all of its own defaults.
        let generation_config = if self.config.max_tokens.is_some()
            || self.config.temperature.is_some()
            || self.config.top_p.is_some()
        {
            Some(ApiGenerationConfig {
                max_output_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                top_p: self.config.top_p,
            })
        } else {
            None
        };

        ApiRequest {
            contents,
            system_instruction,
            generation_config,
            tools,
        }
    }

    async fn handle_response(response: Response, model: &str) -> Result<CompletionResponse> {
        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let body = response.text().await?;
        let parsed: ApiResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Serialization(e.to_string()))?;

        from_api_response(parsed, model)
    }

    async fn handle_error_response(response: Response) -> LlmError {
        let status = response.status();

        let retry_after_header = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response.text().await.unwrap_or_default();

        if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
            match status.as_u16() {
                401 | 403 => {
                    LlmError::Auth(format!("Authentication failed: {}", error.error.message))
                }
                429 => LlmError::RateLimit(RateLimitInfo::from_response(
                    &error.error.message,
                    retry_after_header.as_deref(),
                )),
                500..=599 => LlmError::Backend(format!("Server error: {}", error.error.message)),
                _ => LlmError::Backend(error.error.message),
            }
        } else {
            LlmError::Backend(format!("HTTP {}: {}", status, body))
        }
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.to_api_request(&request);

        tracing::debug!(
            backend = "gemini",
            model = %self.config.model,
            contents = body.contents.len(),
            "Sending generateContent request"
        );

        with_retry(self.max_retries, self.retry_backoff, "gemini", || async {
            let client = &self.config.client;
            let response = client
                .client
                .post(client.generate_url(&self.config.model))
                .header("x-goog-api-key", &client.api_key)
                .header(header::CONTENT_TYPE, "application/json")
                .json(&body)
                .send()
                .await?;

            Self::handle_response(response, &self.config.model).await
        })
        .await
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn type_label(&self) -> Option<&'static str> {
        Some("Gemini")
    }
}

fn to_part(block: &ContentBlock) -> ApiPart {
    match block {
        ContentBlock::Text { text } => ApiPart {
            text: Some(text.clone()),
            function_call: None,
            function_response: None,
        },
        ContentBlock::ToolUse { name, input, .. } => ApiPart {
            text: None,
            function_call: Some(ApiFunctionCall {
                name: name.clone(),
                args: input.clone(),
            }),
            function_response: None,
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } => ApiPart {
            text: None,
            function_call: None,
            function_response: Some(ApiFunctionResponse {
                name: tool_use_id.clone(),
                response: serde_json::json!({ "result": content }),
            }),
        },
    }
}

fn from_api_response(api: ApiResponse, model: &str) -> Result<CompletionResponse> {
    let candidate = api
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Backend("response contained no candidates".to_string()))?;

    let mut content = Vec::new();
    let mut saw_function_call = false;
    for part in candidate.content.parts {
        if let Some(text) = part.text {
            content.push(ContentBlock::Text { text });
        }
        if let Some(call) = part.function_call {
            saw_function_call = true;
            content.push(ContentBlock::ToolUse {
                id: call.name.clone(),
                name: call.name,
                input: call.args,
            });
        }
    }

    let stop_reason = if saw_function_call {
        Some(StopReason::ToolUse)
    } else {
        candidate.finish_reason.as_deref().map(|r| match r {
            "MAX_TOKENS" => StopReason::MaxTokens,
            "STOP" => StopReason::EndTurn,
            _ => StopReason::EndTurn,
        })
    };

    let usage = api
        .usage_metadata
        .map(|u| Usage::new(u.prompt_token_count, u.candidates_token_count))
        .unwrap_or_default();

    Ok(CompletionResponse {
        id: String::new(),
        model: model.to_string(),
        content,
        stop_reason,
        usage,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// API Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<ApiGenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiToolGroup>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(default)]
    role: String,
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<ApiFunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<ApiFunctionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    args: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ApiSystemInstruction {
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiToolGroup {
    function_declarations: Vec<ApiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct ApiFunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    usage_metadata: Option<ApiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    content: ApiContent,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn test_client() -> GeminiClient {
        GeminiClient::new(GeminiClientConfig::new("test-key")).unwrap()
    }

    #[test]
    fn test_client_requires_api_key() {
        let result = GeminiClient::new(GeminiClientConfig::new(""));
        assert!(matches!(result, Err(LlmError::Config(_))));
    }

    #[test]
    fn test_generate_url() {
        let client = test_client();
        assert_eq!(
            client.generate_url("gemini-2.0-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );

        let client = GeminiClient::new(
            GeminiClientConfig::new("k").with_base_url("https://proxy.internal"),
        )
        .unwrap();
        assert_eq!(
            client.generate_url("m"),
            "https://proxy.internal/v1beta/models/m:generateContent"
        );
    }

    #[test]
    fn test_generation_config_omitted_when_unset() {
        let backend =
            GeminiBackend::new(GeminiConfig::new(test_client(), "gemini-2.0-flash")).unwrap();
        let body = backend.to_api_request(&CompletionRequest::new(vec![Message::user("hi")]));

        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("generationConfig").is_none());
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn test_generation_config_partial_set() {
        let mut config = GeminiConfig::new(test_client(), "gemini-2.0-flash");
        config.temperature = Some(0.2);
        let backend = GeminiBackend::new(config).unwrap();
        let body = backend.to_api_request(&CompletionRequest::new(vec![Message::user("hi")]));

        let json = serde_json::to_value(&body).unwrap();
        let generation = json.get("generationConfig").unwrap();
        assert_eq!(generation["temperature"], 0.2f32);
        assert!(generation.get("maxOutputTokens").is_none());
        assert!(generation.get("topP").is_none());
    }

    #[test]
    fn test_assistant_role_maps_to_model() {
        let backend = GeminiBackend::new(GeminiConfig::new(test_client(), "m")).unwrap();
        let body = backend.to_api_request(&CompletionRequest::new(vec![
            Message::user("q"),
            Message::assistant("a"),
        ]));

        assert_eq!(body.contents[0].role, "user");
        assert_eq!(body.contents[1].role, "model");
    }

    #[test]
    fn test_response_with_function_call() {
        let body = r#"{
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"functionCall": {"name": "lookup", "args": {"q": "x"}}}]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 3}
        }"#;

        let parsed: ApiResponse = serde_json::from_str(body).unwrap();
        let response = from_api_response(parsed, "gemini-2.0-flash").unwrap();

        assert!(response.has_tool_use());
        // A function call wins over the reported finish reason.
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage.input_tokens, 5);
    }

    #[test]
    fn test_response_without_candidates_is_error() {
        let parsed: ApiResponse = serde_json::from_str(r#"{"candidates": []}"#).unwrap();
        assert!(from_api_response(parsed, "m").is_err());
    }
}
