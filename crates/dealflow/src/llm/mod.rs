//! LLM Module - provider abstraction for chat with tool calling and web search

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub mod external;

pub use external::ExternalProvider;

/// LLM operation mode
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum LLMMode {
    /// External API provider
    External {
        provider: ApiProvider,
        api_key: String,
        model: String,
    },
    /// LLM disabled; agent and screening calls fail fast
    #[default]
    Disabled,
}

/// External API providers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ApiProvider {
    OpenAI,
    Anthropic,
    OpenRouter,
    Perplexity,
    Custom { endpoint: String },
}

impl ApiProvider {
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.starts_with("http://") || name.starts_with("https://") {
            return Some(Self::Custom { endpoint: name.to_string() });
        }
        match name.to_lowercase().as_str() {
            "openai" => Some(Self::OpenAI),
            "anthropic" => Some(Self::Anthropic),
            "openrouter" => Some(Self::OpenRouter),
            "perplexity" => Some(Self::Perplexity),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o",
            Self::Anthropic => "claude-sonnet-4-20250514",
            Self::OpenRouter => "openai/gpt-4o",
            Self::Perplexity => "sonar-pro",
            Self::Custom { .. } => "default",
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    pub mode: LLMMode,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            mode: LLMMode::Disabled,
            max_tokens: 4096,
            temperature: 0.2,
            top_p: 0.95,
        }
    }
}

/// Build the configured provider, or `None` when the LLM is disabled.
pub fn provider_from_config(config: &LLMConfig) -> Result<Option<Arc<dyn LLMProvider>>> {
    match &config.mode {
        LLMMode::External { provider, api_key, model } => {
            if api_key.trim().is_empty() {
                return Err(anyhow!("LLM API key is empty"));
            }
            let provider = ExternalProvider::new(provider.clone(), api_key.clone(), model.clone())?;
            Ok(Some(Arc::new(provider)))
        }
        LLMMode::Disabled => Ok(None),
    }
}

/// A chat model reachable over some transport. Shared as `Arc<dyn LLMProvider>`.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// One completion over the whole history. An empty `tools` slice means
    /// the model must answer in text.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatResponse>;

    /// Search-augmented answer with source attribution.
    async fn web_search(&self, query: &str, config: &GenerationConfig) -> Result<WebSearchAnswer>;

    fn info(&self) -> ProviderInfo;
}

/// Sampling settings passed on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self::from(&LLMConfig::default())
    }
}

impl From<&LLMConfig> for GenerationConfig {
    fn from(config: &LLMConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        }
    }
}

// ==================== Chat wire types ====================

/// One turn of a conversation as sent to, or received from, a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    /// Set on assistant turns that ask for tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Set on tool turns: the call being answered and the tool's id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn text(role: ChatRole, content: String) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(ChatRole::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(ChatRole::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(ChatRole::Assistant, content.into())
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls: Some(tool_calls),
            ..Self::text(ChatRole::Assistant, String::new())
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::text(ChatRole::Tool, content.into())
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Tool request emitted by the model. `arguments` is the raw JSON string as
/// the provider sent it; the tool loop parses it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Function declaration offered to the model, built from the tool registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema object.
    pub parameters: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ChatResponse {
    /// Final text.
    Content(String),
    /// One or more tools to run before the model continues.
    ToolCalls(Vec<ToolCall>),
}

/// Answer from the search-augmented mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebSearchAnswer {
    pub text: String,
    pub sources: Vec<WebSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebSource {
    pub title: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub supports_functions: bool,
    pub supports_web_search: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_config_default() {
        let config = LLMConfig::default();
        assert!(matches!(config.mode, LLMMode::Disabled));
        assert_eq!(config.max_tokens, 4096);
        assert!(provider_from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_provider_from_name() {
        assert_eq!(ApiProvider::from_name("Anthropic"), Some(ApiProvider::Anthropic));
        assert!(matches!(
            ApiProvider::from_name("https://llm.internal/v1/chat/completions"),
            Some(ApiProvider::Custom { .. })
        ));
        assert_eq!(ApiProvider::from_name("nope"), None);
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let config = LLMConfig {
            mode: LLMMode::External {
                provider: ApiProvider::OpenAI,
                api_key: "  ".into(),
                model: "gpt-4o".into(),
            },
            ..Default::default()
        };
        assert!(provider_from_config(&config).is_err());
    }
}
