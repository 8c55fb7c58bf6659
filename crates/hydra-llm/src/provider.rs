//! Provider resolution and chat model construction.
//!
//! The single entry point is [`ChatModel::new`]: it maps a provider
//! identifier onto a backend variant through a fixed registry, translates
//! the generic [`ChatModelConfig`] into that variant's native configuration,
//! invokes the variant's constructor, and wraps the result so callers work
//! against one type regardless of vendor.
//!
//! Translation is field-by-field and side-effect free. An unset generic
//! field never overwrites a native default: every `to_*_config` starts from
//! the backend's own constructor and assigns only inside `if let Some`
//! branches. Construction errors are wrapped with the variant label and
//! propagated; nothing here logs or retries.

use std::sync::Arc;

use crate::ark::{ArkBackend, ArkConfig};
use crate::arkbot::{ArkBotBackend, ArkBotConfig};
use crate::backend::{ChatBackend, SharedBackend};
use crate::claude::{ClaudeBackend, ClaudeConfig};
use crate::deepseek::{DeepSeekBackend, DeepSeekConfig};
use crate::error::{LlmError, Result};
use crate::gemini::{GeminiBackend, GeminiClient, GeminiClientConfig, GeminiConfig};
use crate::ollama::{OllamaBackend, OllamaConfig};
use crate::openai::{OpenAiBackend, OpenAiConfig};
use crate::qwen::{QwenBackend, QwenConfig};
use crate::types::{CompletionRequest, CompletionResponse};

// ─────────────────────────────────────────────────────────────────────────────
// Model Types
// ─────────────────────────────────────────────────────────────────────────────

/// The closed set of backend variants.
///
/// Distinct from provider identifiers: several identifiers can resolve to
/// one variant. Adding a variant extends this enum and the `match` in
/// [`ChatModel::new`]; both are checked by the compiler, so the registry
/// cannot drift from the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    OpenAi,
    AzureOpenAi,
    Gemini,
    Claude,
    Ollama,
    DeepSeek,
    Ark,
    ArkBot,
    Qwen,
}

impl ModelType {
    /// Stable label for this variant.
    pub fn label(&self) -> &'static str {
        match self {
            ModelType::OpenAi => "OpenAI",
            ModelType::AzureOpenAi => "AzureOpenAI",
            ModelType::Gemini => "Gemini",
            ModelType::Claude => "Claude",
            ModelType::Ollama => "Ollama",
            ModelType::DeepSeek => "DeepSeek",
            ModelType::Ark => "Ark",
            ModelType::ArkBot => "ArkBot",
            ModelType::Qwen => "Qwen",
        }
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Identifier registry: provider identifier to backend variant.
///
/// Lookup is exact-match and case-sensitive; no normalization, no fuzzy
/// matching. Aliasing is explicit: `openrouter` rides the OpenAI-compatible
/// variant, `vertex_ai` the Gemini one. No identifier currently resolves to
/// `ArkBot`; that variant is only reachable by constructing its backend
/// directly.
const PROVIDERS: &[(&str, ModelType)] = &[
    ("openai", ModelType::OpenAi),
    ("azure", ModelType::AzureOpenAi),
    ("openrouter", ModelType::OpenAi),
    ("vertex_ai", ModelType::Gemini),
    ("gemini", ModelType::Gemini),
    ("anthropic", ModelType::Claude),
    ("ollama", ModelType::Ollama),
    ("deepseek", ModelType::DeepSeek),
    ("volcengine", ModelType::Ark),
    ("dashscope", ModelType::Qwen),
];

/// Resolve a provider identifier to its backend variant.
pub fn resolve(provider: &str) -> Option<ModelType> {
    PROVIDERS
        .iter()
        .find(|(id, _)| *id == provider)
        .map(|(_, model_type)| *model_type)
}

// ─────────────────────────────────────────────────────────────────────────────
// Generic Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Caller-facing generation parameters, identical across providers.
///
/// Optional fields distinguish "unset" from an explicit value; backends
/// treat the two differently (temperature `0.0` is a real setting, absence
/// means "use the backend default"), so none of these are ever materialized
/// to a zero value during translation.
#[derive(Debug, Clone, Default)]
pub struct ChatModelConfig {
    /// Credential for the provider. Requiredness varies by variant.
    pub api_key: String,

    /// Endpoint override. Unset uses the backend's default base URL.
    pub base_url: Option<String>,

    /// Model name.
    pub model: String,

    /// Cap on generated tokens.
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Nucleus sampling parameter.
    pub top_p: Option<f32>,

    /// Stop sequences.
    pub stop: Option<Vec<String>>,
}

impl ChatModelConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Set the endpoint override.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the token cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the nucleus sampling parameter.
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set the stop sequences.
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Per-variant translation
    // ─────────────────────────────────────────────────────────────────────────

    fn to_openai_config(&self) -> OpenAiConfig {
        let mut cfg = OpenAiConfig::new(self.api_key.clone(), self.model.clone());
        if let Some(base_url) = &self.base_url {
            cfg.base_url = base_url.clone();
        }
        if let Some(max_tokens) = self.max_tokens {
            cfg.max_completion_tokens = Some(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            cfg.temperature = Some(temperature);
        }
        if let Some(top_p) = self.top_p {
            cfg.top_p = Some(top_p);
        }
        if let Some(stop) = &self.stop {
            cfg.stop = Some(stop.clone());
        }
        cfg
    }

    fn to_claude_config(&self) -> ClaudeConfig {
        let mut cfg = ClaudeConfig::new(self.api_key.clone(), self.model.clone());
        if let Some(base_url) = &self.base_url {
            cfg.base_url = Some(base_url.clone());
        }
        // max_tokens is required on the native side; the native default
        // stands unless the caller chose a value.
        if let Some(max_tokens) = self.max_tokens {
            cfg.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            cfg.temperature = Some(temperature);
        }
        if let Some(top_p) = self.top_p {
            cfg.top_p = Some(top_p);
        }
        if let Some(stop) = &self.stop {
            cfg.stop_sequences = Some(stop.clone());
        }
        cfg
    }

    fn to_gemini_config(&self) -> Result<GeminiConfig> {
        let mut client_config = GeminiClientConfig::new(self.api_key.clone());
        if let Some(base_url) = &self.base_url {
            client_config = client_config.with_base_url(base_url.clone());
        }
        let client = GeminiClient::new(client_config)?;

        let mut cfg = GeminiConfig::new(client, self.model.clone());
        if let Some(max_tokens) = self.max_tokens {
            cfg.max_tokens = Some(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            cfg.temperature = Some(temperature);
        }
        if let Some(top_p) = self.top_p {
            cfg.top_p = Some(top_p);
        }
        // This backend has no stop-sequence field; `stop` does not apply.
        Ok(cfg)
    }

    fn to_ollama_config(&self) -> OllamaConfig {
        let mut cfg = OllamaConfig::new(self.model.clone());
        if let Some(base_url) = &self.base_url {
            cfg = cfg.with_base_url(base_url.clone());
        }
        if let Some(max_tokens) = self.max_tokens {
            cfg.options.num_predict = Some(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            cfg.options.temperature = Some(temperature);
        }
        if let Some(top_p) = self.top_p {
            cfg.options.top_p = Some(top_p);
        }
        if let Some(stop) = &self.stop {
            cfg.options.stop = Some(stop.clone());
        }
        cfg
    }

    fn to_deepseek_config(&self) -> DeepSeekConfig {
        let mut cfg = DeepSeekConfig::new(self.api_key.clone(), self.model.clone());
        if let Some(base_url) = &self.base_url {
            cfg.base_url = base_url.clone();
        }
        // The native fields are plain values carrying vendor defaults;
        // generic optionals are dereferenced only when set.
        if let Some(max_tokens) = self.max_tokens {
            cfg.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            cfg.temperature = temperature;
        }
        if let Some(top_p) = self.top_p {
            cfg.top_p = top_p;
        }
        if let Some(stop) = &self.stop {
            cfg.stop = Some(stop.clone());
        }
        cfg
    }

    fn to_ark_config(&self) -> ArkConfig {
        let mut cfg = ArkConfig::new(self.api_key.clone(), self.model.clone());
        if let Some(base_url) = &self.base_url {
            cfg.base_url = base_url.clone();
        }
        if let Some(max_tokens) = self.max_tokens {
            cfg.max_tokens = Some(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            cfg.temperature = Some(temperature);
        }
        if let Some(top_p) = self.top_p {
            cfg.top_p = Some(top_p);
        }
        if let Some(stop) = &self.stop {
            cfg.stop = Some(stop.clone());
        }
        cfg
    }

    fn to_arkbot_config(&self) -> ArkBotConfig {
        let mut cfg = ArkBotConfig::new(self.api_key.clone(), self.model.clone());
        if let Some(base_url) = &self.base_url {
            cfg.base_url = base_url.clone();
        }
        if let Some(max_tokens) = self.max_tokens {
            cfg.max_tokens = Some(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            cfg.temperature = Some(temperature);
        }
        if let Some(top_p) = self.top_p {
            cfg.top_p = Some(top_p);
        }
        if let Some(stop) = &self.stop {
            cfg.stop = Some(stop.clone());
        }
        cfg
    }

    fn to_qwen_config(&self) -> QwenConfig {
        let mut cfg = QwenConfig::new(self.api_key.clone(), self.model.clone());
        if let Some(base_url) = &self.base_url {
            cfg.base_url = base_url.clone();
        }
        if let Some(max_tokens) = self.max_tokens {
            cfg.max_tokens = Some(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            cfg.temperature = Some(temperature);
        }
        if let Some(top_p) = self.top_p {
            cfg.top_p = Some(top_p);
        }
        if let Some(stop) = &self.stop {
            cfg.stop = Some(stop.clone());
        }
        cfg
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat Model
// ─────────────────────────────────────────────────────────────────────────────

/// Uniform chat client over any backend variant.
///
/// Construction fixes all configuration; the wrapped backend holds no
/// mutable state afterwards, so a `ChatModel` can serve concurrent requests
/// without coordination.
pub struct ChatModel {
    config: ChatModelConfig,
    backend: SharedBackend,
}

impl std::fmt::Debug for ChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatModel")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ChatModel {
    /// Resolve a provider identifier and build a chat model for it.
    ///
    /// Only the Ark credential-exchange path can touch the network during
    /// construction; every other variant constructs in-process. Dropping
    /// the returned future cancels that exchange.
    pub async fn new(provider: &str, config: ChatModelConfig) -> Result<ChatModel> {
        let Some(model_type) = resolve(provider) else {
            return Err(LlmError::UnsupportedProvider(provider.to_string()));
        };

        let backend: SharedBackend = match model_type {
            ModelType::OpenAi => {
                let openai_config = config.to_openai_config();
                let backend = OpenAiBackend::new(openai_config)
                    .map_err(|e| LlmError::construction(model_type.label(), e))?;
                Arc::new(backend)
            }
            ModelType::AzureOpenAi => {
                let mut openai_config = config.to_openai_config();
                openai_config.by_azure = true;
                let backend = OpenAiBackend::new(openai_config)
                    .map_err(|e| LlmError::construction(model_type.label(), e))?;
                Arc::new(backend)
            }
            ModelType::Gemini => {
                let gemini_config = config
                    .to_gemini_config()
                    .map_err(|e| LlmError::construction(model_type.label(), e))?;
                let backend = GeminiBackend::new(gemini_config)
                    .map_err(|e| LlmError::construction(model_type.label(), e))?;
                Arc::new(backend)
            }
            ModelType::Claude => {
                let claude_config = config.to_claude_config();
                let backend = ClaudeBackend::new(claude_config)
                    .map_err(|e| LlmError::construction(model_type.label(), e))?;
                Arc::new(backend)
            }
            ModelType::Ollama => {
                let ollama_config = config.to_ollama_config();
                let backend = OllamaBackend::new(ollama_config)
                    .map_err(|e| LlmError::construction(model_type.label(), e))?;
                Arc::new(backend)
            }
            ModelType::DeepSeek => {
                let deepseek_config = config.to_deepseek_config();
                let backend = DeepSeekBackend::new(deepseek_config)
                    .map_err(|e| LlmError::construction(model_type.label(), e))?;
                Arc::new(backend)
            }
            ModelType::Ark => {
                let ark_config = config.to_ark_config();
                let backend = ArkBackend::new(ark_config)
                    .await
                    .map_err(|e| LlmError::construction(model_type.label(), e))?;
                Arc::new(backend)
            }
            ModelType::ArkBot => {
                let arkbot_config = config.to_arkbot_config();
                let backend = ArkBotBackend::new(arkbot_config)
                    .map_err(|e| LlmError::construction(model_type.label(), e))?;
                Arc::new(backend)
            }
            ModelType::Qwen => {
                let qwen_config = config.to_qwen_config();
                let backend = QwenBackend::new(qwen_config)
                    .map_err(|e| LlmError::construction(model_type.label(), e))?;
                Arc::new(backend)
            }
        };

        Ok(ChatModel { config, backend })
    }

    /// The generic configuration this model was built from.
    pub fn config(&self) -> &ChatModelConfig {
        &self.config
    }

    /// Stable label of the wrapped backend.
    ///
    /// Best-effort: a backend that does not self-report yields `"unknown"`.
    /// Never fails.
    pub fn get_type(&self) -> &'static str {
        self.backend.type_label().unwrap_or("unknown")
    }

    /// Execute a completion request on the wrapped backend.
    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.backend.complete(request).await
    }
}

// The uniform client is itself a backend, so callers can pass it anywhere a
// backend is expected.
#[async_trait::async_trait]
impl ChatBackend for ChatModel {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        ChatModel::complete(self, request).await
    }

    fn name(&self) -> &str {
        self.backend.name()
    }

    fn type_label(&self) -> Option<&'static str> {
        self.backend.type_label()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
