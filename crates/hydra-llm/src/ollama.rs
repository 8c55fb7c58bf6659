//! Ollama backend over the native `/api/chat` endpoint.
//!
//! Differences from the hosted backends:
//! - No authentication; the server is addressed by base URL alone.
//! - Generation parameters are nested in an `options` object, and the token
//!   cap is called `num_predict`.
//! - Tool definitions use the OpenAI-style function wrapper, but tool calls
//!   in responses carry no ids; the function name stands in as the id.
//! - Must send `stream: false` for a synchronous response.
//! - Token usage arrives as `prompt_eval_count` / `eval_count`, which may be
//!   absent.

use async_trait::async_trait;
use reqwest::{Client, Response, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backend::{ChatBackend, with_retry};
use crate::error::{LlmError, Result};
use crate::types::{
    CompletionRequest, CompletionResponse, ContentBlock, Role, StopReason, Usage,
};

/// Default Ollama server URL.
const DEFAULT_OLLAMA_BASE: &str = "http://localhost:11434";

/// Default timeout; local inference can be slow.
const DEFAULT_TIMEOUT_SECS: u64 = 600;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Generation options, nested under `options` on the wire.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OllamaOptions {
    /// Cap on generated tokens. Unset leaves the server default in place.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,

    /// Sampling temperature. Unset leaves the server default in place.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter. Unset leaves the server default in place.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Stop sequences. Unset sends none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

/// Configuration for the Ollama backend.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL of the Ollama server.
    pub base_url: String,

    /// Model name.
    pub model: String,

    /// Nested generation options.
    pub options: OllamaOptions,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum retries for transient errors.
    pub max_retries: u32,

    /// Initial backoff duration for retries.
    pub retry_backoff: Duration,
}

impl OllamaConfig {
    /// Create a new config with the given model, targeting the local server.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_BASE.to_string(),
            model: model.into(),
            options: OllamaOptions::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        // Trailing slash would break URL construction below.
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ollama Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Ollama native API backend.
pub struct OllamaBackend {
    client: Client,
    config: OllamaConfig,
}

impl OllamaBackend {
    /// Create a new Ollama backend with the given configuration.
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.base_url)
    }

    fn to_api_request(&self, request: &CompletionRequest) -> ApiRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(ref system) = request.system {
            messages.push(ApiMessage {
                role: "system".to_string(),
                content: system.clone(),
                tool_calls: None,
            });
        }

        for m in &request.messages {
            push_message(m.role, &m.content.blocks(), &mut messages);
        }

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| ApiToolDef {
                        tool_type: "function".to_string(),
                        function: ApiFunctionDef {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect(),
            )
        };

        ApiRequest {
            model: self.config.model.clone(),
            messages,
            stream: false,
            tools,
            options: self.config.options.clone(),
        }
    }

    async fn handle_response(response: Response, model: &str) -> Result<CompletionResponse> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                404 => LlmError::Backend(format!("Model not found: {}", body)),
                500..=599 => LlmError::Backend(format!("Server error: {}", body)),
                _ => LlmError::Backend(format!("HTTP {}: {}", status, body)),
            });
        }

        let body = response.text().await?;
        let parsed: ApiResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Serialization(e.to_string()))?;

        let mut content = Vec::new();
        if !parsed.message.content.is_empty() {
            content.push(ContentBlock::Text {
                text: parsed.message.content,
            });
        }

        let mut saw_tool_call = false;
        if let Some(calls) = parsed.message.tool_calls {
            for call in calls {
                saw_tool_call = true;
                content.push(ContentBlock::ToolUse {
                    id: call.function.name.clone(),
                    name: call.function.name,
                    input: call.function.arguments,
                });
            }
        }

        let stop_reason = if saw_tool_call {
            Some(StopReason::ToolUse)
        } else {
            parsed.done_reason.as_deref().map(|r| match r {
                "length" => StopReason::MaxTokens,
                _ => StopReason::EndTurn,
            })
        };

        Ok(CompletionResponse {
            id: String::new(),
            model: model.to_string(),
            content,
            stop_reason,
            usage: Usage::new(
                parsed.prompt_eval_count.unwrap_or(0),
                parsed.eval_count.unwrap_or(0),
            ),
        })
    }
}

/// Append a generic message to the wire message list.
///
/// Tool results become `role: "tool"` messages; assistant tool uses become
/// `tool_calls` on an assistant message.
fn push_message(role: Role, blocks: &[ContentBlock], out: &mut Vec<ApiMessage>) {
    let tool_calls: Vec<ApiToolCall> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { name, input, .. } => Some(ApiToolCall {
                function: ApiFunctionCall {
                    name: name.clone(),
                    arguments: input.clone(),
                },
            }),
            _ => None,
        })
        .collect();

    let tool_results: Vec<&str> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolResult { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect();

    let text: String = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");

    if !tool_results.is_empty() {
        for result in tool_results {
            out.push(ApiMessage {
                role: "tool".to_string(),
                content: result.to_string(),
                tool_calls: None,
            });
        }
    } else if !tool_calls.is_empty() {
        out.push(ApiMessage {
            role: "assistant".to_string(),
            content: text,
            tool_calls: Some(tool_calls),
        });
    } else {
        out.push(ApiMessage {
            role: match role {
                Role::User => "user".to_string(),
                Role::Assistant => "assistant".to_string(),
            },
            content: text,
            tool_calls: None,
        });
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.to_api_request(&request);

        tracing::debug!(
            backend = "ollama",
            model = %body.model,
            messages = body.messages.len(),
            "Sending chat request"
        );

        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            "ollama",
            || async {
                let response = self
                    .client
                    .post(self.chat_url())
                    .header(header::CONTENT_TYPE, "application/json")
                    .json(&body)
                    .send()
                    .await?;

                Self::handle_response(response, &self.config.model).await
            },
        )
        .await
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn type_label(&self) -> Option<&'static str> {
        Some("Ollama")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiToolDef>>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Serialize)]
struct ApiToolDef {
    #[serde(rename = "type")]
    tool_type: String,
    function: ApiFunctionDef,
}

#[derive(Debug, Serialize)]
struct ApiFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    function: ApiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    message: ApiResponseMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
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
        let config = OllamaConfig::new("llama3.2");
        assert_eq!(config.base_url, DEFAULT_OLLAMA_BASE);
        assert!(config.options.num_predict.is_none());
        assert!(config.options.temperature.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let config = OllamaConfig::new("m").with_base_url("http://box:11434/");
        assert_eq!(config.base_url, "http://box:11434");

        let backend = OllamaBackend::new(config).unwrap();
        assert_eq!(backend.chat_url(), "http://box:11434/api/chat");
    }

    #[test]
    fn test_request_is_not_streaming() {
        let backend = OllamaBackend::new(OllamaConfig::new("m")).unwrap();
        let body = backend.to_api_request(&CompletionRequest::new(vec![Message::user("hi")]));
        assert!(!body.stream);
    }

    #[test]
    fn test_unset_options_stay_off_the_wire() {
        let backend = OllamaBackend::new(OllamaConfig::new("m")).unwrap();
        let body = backend.to_api_request(&CompletionRequest::new(vec![Message::user("hi")]));

        let json = serde_json::to_value(&body).unwrap();
        let options = json.get("options").unwrap().as_object().unwrap();
        assert!(options.is_empty());
    }

    #[test]
    fn test_set_options_nest_under_options() {
        let mut config = OllamaConfig::new("m");
        config.options.num_predict = Some(256);
        config.options.temperature = Some(0.1);
        let backend = OllamaBackend::new(config).unwrap();
        let body = backend.to_api_request(&CompletionRequest::new(vec![Message::user("hi")]));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["options"]["num_predict"], 256);
        assert_eq!(json["options"]["temperature"], 0.1f32);
        assert!(json["options"].get("top_p").is_none());
    }

    #[test]
    fn test_system_prompt_becomes_first_message() {
        let backend = OllamaBackend::new(OllamaConfig::new("m")).unwrap();
        let body = backend.to_api_request(
            &CompletionRequest::new(vec![Message::user("hi")]).with_system("be terse"),
        );

        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[0].content, "be terse");
        assert_eq!(body.messages[1].role, "user");
    }

    #[tokio::test]
    async fn test_complete_round_trip_with_tool_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "message": {
                        "role": "assistant",
                        "content": "",
                        "tool_calls": [
                            {"function": {"name": "lookup", "arguments": {"q": "x"}}}
                        ]
                    },
                    "done_reason": "stop",
                    "prompt_eval_count": 11,
                    "eval_count": 4
                }"#,
            )
            .create_async()
            .await;

        let backend =
            OllamaBackend::new(OllamaConfig::new("llama3.2").with_base_url(server.url())).unwrap();

        let response = backend
            .complete(CompletionRequest::new(vec![Message::user("look it up")]))
            .await
            .unwrap();

        assert!(response.has_tool_use());
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage.input_tokens, 11);
        assert_eq!(response.usage.output_tokens, 4);
        mock.assert_async().await;
    }
}
