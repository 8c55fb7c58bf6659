//! Provider-agnostic chat model factory.
//!
//! This crate turns a provider identifier plus a small generic parameter set
//! into a ready-to-use chat client. The registry maps identifiers onto a
//! closed set of backend variants; a per-variant translator converts the
//! generic configuration into that vendor's native shape; the constructed
//! backend is returned behind one uniform type.
//!
//! ```text
//! identifier ─▶ registry ─▶ variant ─▶ translate ─▶ backend ─▶ ChatModel
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use hydra_llm::{ChatModel, ChatModelConfig};
//!
//! # async fn run() -> hydra_llm::Result<()> {
//! let config = ChatModelConfig::new()
//!     .with_api_key("sk-...")
//!     .with_model("claude-sonnet-4-5");
//!
//! let model = ChatModel::new("anthropic", config).await?;
//! assert_eq!(model.get_type(), "Claude");
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod provider;
pub mod types;

// Backend variant implementations
pub mod ark;
pub mod arkbot;
pub mod claude;
pub mod deepseek;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod qwen;

mod wire;

pub use backend::{ChatBackend, MockBackend, SharedBackend, with_retry};
pub use error::{LlmError, RateLimitInfo, Result};
pub use provider::{ChatModel, ChatModelConfig, ModelType, resolve};
pub use types::{
    CompletionRequest, CompletionResponse, Content, ContentBlock, Message, Role, StopReason,
    ToolDefinition, Usage,
};

// Re-export provider configs
pub use ark::{ArkBackend, ArkConfig};
pub use arkbot::{ArkBotBackend, ArkBotConfig};
pub use claude::{ClaudeBackend, ClaudeConfig};
pub use deepseek::{DeepSeekBackend, DeepSeekConfig};
pub use gemini::{GeminiBackend, GeminiClient, GeminiClientConfig, GeminiConfig};
pub use ollama::{OllamaBackend, OllamaConfig, OllamaOptions};
pub use openai::{OpenAiBackend, OpenAiConfig};
pub use qwen::{QwenBackend, QwenConfig};
