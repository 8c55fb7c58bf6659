//! Shared wire types for OpenAI-dialect chat-completions APIs.
//!
//! OpenAI, Azure OpenAI, DeepSeek, Qwen (DashScope compatible mode), Ark and
//! ArkBot all speak close dialects of the same `/chat/completions` protocol.
//! The request/response shapes live here once; each backend owns its endpoint
//! URL, auth headers and generation parameters.
//!
//! Dialect note: OpenAI caps output with `max_completion_tokens`, the others
//! with `max_tokens`. Both fields exist on [`ChatRequest`] and each backend
//! sets exactly one of them.

use reqwest::Response;
use serde::{Deserialize, Serialize};

use crate::error::{LlmError, RateLimitInfo, Result};
use crate::types::{
    CompletionRequest, CompletionResponse, ContentBlock, Role, StopReason, Usage,
};

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

/// Chat-completions request body.
#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    pub stream: bool,
}

/// A message in chat-completions format.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Tool definition in chat-completions format.
#[derive(Debug, Serialize)]
pub(crate) struct ChatTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: ChatFunction,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatFunction {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

/// Tool call emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChatToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ChatFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChatFunctionCall {
    pub name: String,
    /// Arguments as a JSON-encoded string, per the protocol.
    pub arguments: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatErrorResponse {
    error: ChatErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ChatErrorDetail {
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversions
// ─────────────────────────────────────────────────────────────────────────────

/// Translate a generic request into chat-completions messages.
///
/// System prompt becomes a `system` role message. Tool results become
/// `tool` role messages keyed by `tool_call_id`; assistant tool uses become
/// `tool_calls` entries with JSON-encoded arguments.
pub(crate) fn to_chat_messages(request: &CompletionRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(ref system) = request.system {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: Some(system.clone()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for m in &request.messages {
        let blocks = m.content.blocks();

        let tool_calls: Vec<ChatToolCall> = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatFunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    },
                }),
                _ => None,
            })
            .collect();

        let tool_results: Vec<(String, String)> = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => Some((tool_use_id.clone(), content.clone())),
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
            for (tool_id, result_text) in tool_results {
                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(result_text),
                    tool_calls: None,
                    tool_call_id: Some(tool_id),
                });
            }
        } else if !tool_calls.is_empty() {
            messages.push(ChatMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls: Some(tool_calls),
                tool_call_id: None,
            });
        } else {
            messages.push(ChatMessage {
                role: match m.role {
                    Role::User => "user".to_string(),
                    Role::Assistant => "assistant".to_string(),
                },
                content: Some(text),
                tool_calls: None,
                tool_call_id: None,
            });
        }
    }

    messages
}

/// Translate generic tool definitions into chat-completions format.
pub(crate) fn to_chat_tools(request: &CompletionRequest) -> Option<Vec<ChatTool>> {
    if request.tools.is_empty() {
        return None;
    }
    Some(
        request
            .tools
            .iter()
            .map(|t| ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: t.name.clone(),
                    description: Some(t.description.clone()),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect(),
    )
}

/// Convert a chat-completions response into the generic response type.
pub(crate) fn from_chat_response(
    response: ChatResponse,
    fallback_model: &str,
) -> Result<CompletionResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Backend("response contained no choices".to_string()))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content
        && !text.is_empty()
    {
        content.push(ContentBlock::Text { text });
    }
    if let Some(tool_calls) = choice.message.tool_calls {
        for call in tool_calls {
            let input = serde_json::from_str(&call.function.arguments)
                .unwrap_or(serde_json::Value::Null);
            content.push(ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            });
        }
    }

    let stop_reason = choice.finish_reason.as_deref().map(|r| match r {
        "tool_calls" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        "content_filter" => StopReason::EndTurn,
        _ => StopReason::EndTurn,
    });

    let usage = response
        .usage
        .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();

    let model = if response.model.is_empty() {
        fallback_model.to_string()
    } else {
        response.model
    };

    Ok(CompletionResponse {
        id: response.id,
        model,
        content,
        stop_reason,
        usage,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handling
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a successful chat-completions response body.
pub(crate) async fn handle_response(
    response: Response,
    fallback_model: &str,
) -> Result<CompletionResponse> {
    if !response.status().is_success() {
        return Err(handle_error_response(response).await);
    }

    let body = response.text().await?;
    let parsed: ChatResponse =
        serde_json::from_str(&body).map_err(|e| LlmError::Serialization(e.to_string()))?;

    from_chat_response(parsed, fallback_model)
}

/// Map an error response onto the error taxonomy.
pub(crate) async fn handle_error_response(response: Response) -> LlmError {
    let status = response.status();

    let retry_after_header = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let body = response.text().await.unwrap_or_default();

    if let Ok(error) = serde_json::from_str::<ChatErrorResponse>(&body) {
        match status.as_u16() {
            401 | 403 => LlmError::Auth(format!("Authentication failed: {}", error.error.message)),
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

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[test]
    fn test_system_prompt_becomes_system_message() {
        let request = CompletionRequest::new(vec![Message::user("hi")]).with_system("be terse");
        let messages = to_chat_messages(&request);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content.as_deref(), Some("be terse"));
        assert_eq!(messages[1].role, "user");
    }

    #[test]
    fn test_tool_use_becomes_tool_calls() {
        let request = CompletionRequest::new(vec![
            Message::user("look it up"),
            Message::assistant_blocks(vec![ContentBlock::ToolUse {
                id: "call_1".to_string(),
                name: "lookup".to_string(),
                input: serde_json::json!({"q": "x"}),
            }]),
            Message::tool_result("call_1", "42", false),
        ]);
        let messages = to_chat_messages(&request);

        assert_eq!(messages.len(), 3);
        let calls = messages[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "lookup");
        assert_eq!(calls[0].function.arguments, r#"{"q":"x"}"#);
        assert_eq!(messages[2].role, "tool");
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_unset_fields_stay_off_the_wire() {
        let body = ChatRequest {
            model: "m".to_string(),
            messages: vec![],
            max_tokens: None,
            max_completion_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
            tools: None,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        let obj = json.as_object().unwrap();

        assert!(!obj.contains_key("max_tokens"));
        assert!(!obj.contains_key("max_completion_tokens"));
        assert!(!obj.contains_key("temperature"));
        assert!(!obj.contains_key("top_p"));
        assert!(!obj.contains_key("stop"));
        assert!(!obj.contains_key("tools"));
    }

    #[test]
    fn test_from_chat_response_maps_tool_calls() {
        let response = ChatResponse {
            id: "chatcmpl-1".to_string(),
            model: "m".to_string(),
            choices: vec![ChatChoice {
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: None,
                    tool_calls: Some(vec![ChatToolCall {
                        id: "call_1".to_string(),
                        call_type: "function".to_string(),
                        function: ChatFunctionCall {
                            name: "lookup".to_string(),
                            arguments: r#"{"q":"x"}"#.to_string(),
                        },
                    }]),
                    tool_call_id: None,
                },
                finish_reason: Some("tool_calls".to_string()),
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 7,
                completion_tokens: 3,
            }),
        };

        let parsed = from_chat_response(response, "fallback").unwrap();
        assert!(parsed.has_tool_use());
        assert_eq!(parsed.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(parsed.usage.input_tokens, 7);
    }

    #[test]
    fn test_from_chat_response_empty_choices_is_error() {
        let response = ChatResponse {
            id: String::new(),
            model: String::new(),
            choices: vec![],
            usage: None,
        };
        assert!(from_chat_response(response, "m").is_err());
    }

    #[test]
    fn test_from_chat_response_model_fallback() {
        let response = ChatResponse {
            id: "x".to_string(),
            model: String::new(),
            choices: vec![ChatChoice {
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: Some("hi".to_string()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        };
        let parsed = from_chat_response(response, "deepseek-chat").unwrap();
        assert_eq!(parsed.model, "deepseek-chat");
        assert_eq!(parsed.stop_reason, Some(StopReason::EndTurn));
    }
}
