//! HTTP provider for OpenAI-compatible and Anthropic chat APIs

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{
    ApiProvider, ChatMessage, ChatResponse, ChatRole, GenerationConfig, LLMProvider,
    ProviderInfo, ToolCall, ToolSchema, WebSearchAnswer, WebSource,
};

const WEB_SEARCH_SYSTEM_PROMPT: &str = "You are a research assistant for an M&A team. \
Search the web, answer concisely with figures where available, and cite every source URL.";

pub struct ExternalProvider {
    provider: ApiProvider,
    api_key: String,
    model: String,
    client: Client,
}

impl ExternalProvider {
    /// Parse a response body as JSON, returning a clear error if the server returned HTML
    /// (e.g. a gateway error page) instead of valid JSON.
    async fn parse_json_response(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<serde_json::Value> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;

        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(anyhow!(
                "Endpoint {} returned HTML instead of JSON (HTTP {}): {}",
                endpoint,
                status,
                preview
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            anyhow!(
                "Failed to parse JSON from {} (HTTP {}): {}. Response body: {}",
                endpoint,
                status,
                e,
                preview
            )
        })
    }

    pub fn new(provider: ApiProvider, api_key: String, model: String) -> Result<Self> {
        // Per-call deadlines are enforced by the callers; this is the transport ceiling.
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(300))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        tracing::info!(provider = ?provider, model = %model, "Creating ExternalProvider");

        Ok(Self {
            provider,
            api_key,
            model,
            client,
        })
    }

    fn get_endpoint(&self) -> String {
        match &self.provider {
            ApiProvider::OpenAI => "https://api.openai.com/v1/chat/completions".to_string(),
            ApiProvider::Anthropic => "https://api.anthropic.com/v1/messages".to_string(),
            ApiProvider::OpenRouter => "https://openrouter.ai/api/v1/chat/completions".to_string(),
            ApiProvider::Perplexity => "https://api.perplexity.ai/chat/completions".to_string(),
            ApiProvider::Custom { endpoint } => endpoint.clone(),
        }
    }

    async fn post_json(&self, request: &serde_json::Value) -> Result<serde_json::Value> {
        let endpoint = self.get_endpoint();
        let builder = self.client.post(&endpoint);
        let builder = match self.provider {
            ApiProvider::Anthropic => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01"),
            _ => builder.header("Authorization", format!("Bearer {}", self.api_key)),
        };

        let response = builder.json(request).send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow!("Request to {} timed out", endpoint)
            } else if e.is_connect() {
                anyhow!("Failed to connect to {}: {}", endpoint, e)
            } else {
                anyhow!("Request to {} failed: {}", endpoint, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            let preview: String = error.chars().take(500).collect();
            return Err(anyhow!("LLM API error ({}): {}", status, preview));
        }

        Self::parse_json_response(response, &endpoint).await
    }

    // ==================== Tool-calling: OpenAI-compatible ====================

    fn format_openai_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::Tool => "tool",
                };
                let mut msg = json!({ "role": role });
                if let Some(ref content) = m.content {
                    msg["content"] = json!(content);
                }
                if let Some(ref calls) = m.tool_calls {
                    msg["tool_calls"] = json!(calls
                        .iter()
                        .map(|tc| json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments,
                            }
                        }))
                        .collect::<Vec<_>>());
                }
                if let Some(ref id) = m.tool_call_id {
                    msg["tool_call_id"] = json!(id);
                }
                if let Some(ref name) = m.name {
                    msg["name"] = json!(name);
                }
                msg
            })
            .collect()
    }

    fn format_openai_tools(tools: &[ToolSchema]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    fn parse_openai_response(body: &serde_json::Value) -> ChatResponse {
        let choice = &body["choices"][0]["message"];

        if let Some(tool_calls) = choice["tool_calls"].as_array() {
            let calls: Vec<ToolCall> = tool_calls
                .iter()
                .filter_map(|tc| {
                    Some(ToolCall {
                        id: tc["id"].as_str()?.to_string(),
                        name: tc["function"]["name"].as_str()?.to_string(),
                        arguments: tc["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
                    })
                })
                .collect();
            if !calls.is_empty() {
                return ChatResponse::ToolCalls(calls);
            }
        }

        ChatResponse::Content(choice["content"].as_str().unwrap_or("").to_string())
    }

    async fn openai_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatResponse> {
        let mut request = json!({
            "model": self.model,
            "messages": Self::format_openai_messages(messages),
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "stream": false
        });

        if !tools.is_empty() {
            request["tools"] = json!(Self::format_openai_tools(tools));
            request["tool_choice"] = json!("auto");
        }

        let body = self.post_json(&request).await?;
        Ok(Self::parse_openai_response(&body))
    }

    async fn openai_web_search(&self, query: &str, config: &GenerationConfig) -> Result<WebSearchAnswer> {
        let mut request = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": WEB_SEARCH_SYSTEM_PROMPT },
                { "role": "user", "content": query },
            ],
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
        });
        if self.provider == ApiProvider::OpenRouter {
            // OpenRouter's web plugin works with any model.
            request["plugins"] = json!([{ "id": "web" }]);
        }

        let body = self.post_json(&request).await?;
        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let mut sources = Vec::new();
        // Perplexity: top-level `citations` (urls) and/or `search_results`.
        if let Some(results) = body["search_results"].as_array() {
            for r in results {
                if let Some(url) = r["url"].as_str() {
                    sources.push(WebSource {
                        title: r["title"].as_str().map(str::to_string),
                        url: url.to_string(),
                    });
                }
            }
        } else if let Some(citations) = body["citations"].as_array() {
            for c in citations {
                if let Some(url) = c.as_str() {
                    sources.push(WebSource { title: None, url: url.to_string() });
                }
            }
        }
        // OpenAI / OpenRouter: url_citation annotations.
        if let Some(annotations) = body["choices"][0]["message"]["annotations"].as_array() {
            for a in annotations {
                let citation = &a["url_citation"];
                if let Some(url) = citation["url"].as_str() {
                    sources.push(WebSource {
                        title: citation["title"].as_str().map(str::to_string),
                        url: url.to_string(),
                    });
                }
            }
        }

        Ok(WebSearchAnswer { text, sources: dedup_sources(sources) })
    }

    // ==================== Tool-calling: Anthropic ====================

    fn format_anthropic_messages(
        messages: &[ChatMessage],
    ) -> (Option<String>, Vec<serde_json::Value>) {
        let mut system_prompt = None;
        let mut api_messages = Vec::new();

        for m in messages {
            match m.role {
                ChatRole::System => {
                    system_prompt = m.content.clone();
                }
                ChatRole::User => {
                    if let Some(ref content) = m.content {
                        api_messages.push(json!({ "role": "user", "content": content }));
                    }
                }
                ChatRole::Assistant => {
                    if let Some(ref calls) = m.tool_calls {
                        let content: Vec<serde_json::Value> = calls
                            .iter()
                            .map(|tc| {
                                let args: serde_json::Value =
                                    serde_json::from_str(&tc.arguments).unwrap_or(json!({}));
                                json!({
                                    "type": "tool_use",
                                    "id": tc.id,
                                    "name": tc.name,
                                    "input": args,
                                })
                            })
                            .collect();
                        api_messages.push(json!({ "role": "assistant", "content": content }));
                    } else if let Some(ref content) = m.content {
                        api_messages.push(json!({ "role": "assistant", "content": content }));
                    }
                }
                ChatRole::Tool => {
                    // Consecutive tool results must share one user turn.
                    if let (Some(ref id), Some(ref content)) = (&m.tool_call_id, &m.content) {
                        let block = json!({
                            "type": "tool_result",
                            "tool_use_id": id,
                            "content": content,
                        });
                        let appended = match api_messages.last_mut() {
                            Some(last)
                                if last["role"] == "user"
                                    && last["content"]
                                        .as_array()
                                        .map(|blocks| blocks.iter().all(|b| b["type"] == "tool_result"))
                                        .unwrap_or(false) =>
                            {
                                if let Some(blocks) = last["content"].as_array_mut() {
                                    blocks.push(block.clone());
                                }
                                true
                            }
                            _ => false,
                        };
                        if !appended {
                            api_messages.push(json!({ "role": "user", "content": [block] }));
                        }
                    }
                }
            }
        }
        (system_prompt, api_messages)
    }

    fn format_anthropic_tools(tools: &[ToolSchema]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect()
    }

    fn parse_anthropic_response(body: &serde_json::Value) -> ChatResponse {
        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();

        if let Some(content) = body["content"].as_array() {
            for block in content {
                match block["type"].as_str() {
                    Some("text") => {
                        if let Some(text) = block["text"].as_str() {
                            text_parts.push(text.to_string());
                        }
                    }
                    Some("tool_use") => {
                        if let (Some(id), Some(name)) = (block["id"].as_str(), block["name"].as_str()) {
                            let args = serde_json::to_string(&block["input"])
                                .unwrap_or_else(|_| "{}".to_string());
                            tool_calls.push(ToolCall {
                                id: id.to_string(),
                                name: name.to_string(),
                                arguments: args,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }

        if !tool_calls.is_empty() {
            ChatResponse::ToolCalls(tool_calls)
        } else {
            ChatResponse::Content(text_parts.join(""))
        }
    }

    async fn anthropic_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatResponse> {
        let (system_prompt, api_messages) = Self::format_anthropic_messages(messages);

        let mut request = json!({
            "model": self.model,
            "messages": api_messages,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
        });
        if let Some(ref sys) = system_prompt {
            request["system"] = json!(sys);
        }
        if !tools.is_empty() {
            request["tools"] = json!(Self::format_anthropic_tools(tools));
        }

        let body = self.post_json(&request).await?;
        Ok(Self::parse_anthropic_response(&body))
    }

    async fn anthropic_web_search(&self, query: &str, config: &GenerationConfig) -> Result<WebSearchAnswer> {
        let request = json!({
            "model": self.model,
            "system": WEB_SEARCH_SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": query }],
            "max_tokens": config.max_tokens,
            "tools": [{ "type": "web_search_20250305", "name": "web_search", "max_uses": 5 }],
        });

        let body = self.post_json(&request).await?;
        let mut text = String::new();
        let mut sources = Vec::new();

        if let Some(content) = body["content"].as_array() {
            for block in content {
                match block["type"].as_str() {
                    Some("text") => {
                        text.push_str(block["text"].as_str().unwrap_or(""));
                        if let Some(citations) = block["citations"].as_array() {
                            for c in citations {
                                if let Some(url) = c["url"].as_str() {
                                    sources.push(WebSource {
                                        title: c["title"].as_str().map(str::to_string),
                                        url: url.to_string(),
                                    });
                                }
                            }
                        }
                    }
                    Some("web_search_tool_result") => {
                        if let Some(results) = block["content"].as_array() {
                            for r in results {
                                if let Some(url) = r["url"].as_str() {
                                    sources.push(WebSource {
                                        title: r["title"].as_str().map(str::to_string),
                                        url: url.to_string(),
                                    });
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(WebSearchAnswer { text, sources: dedup_sources(sources) })
    }
}

fn dedup_sources(sources: Vec<WebSource>) -> Vec<WebSource> {
    let mut seen = std::collections::HashSet::new();
    sources
        .into_iter()
        .filter(|s| seen.insert(s.url.clone()))
        .collect()
}

#[async_trait]
impl LLMProvider for ExternalProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        config: &GenerationConfig,
    ) -> Result<ChatResponse> {
        match &self.provider {
            ApiProvider::Anthropic => self.anthropic_chat(messages, tools, config).await,
            _ => self.openai_chat(messages, tools, config).await,
        }
    }

    async fn web_search(&self, query: &str, config: &GenerationConfig) -> Result<WebSearchAnswer> {
        match &self.provider {
            ApiProvider::Anthropic => self.anthropic_web_search(query, config).await,
            _ => self.openai_web_search(query, config).await,
        }
    }

    fn info(&self) -> ProviderInfo {
        let name = match &self.provider {
            ApiProvider::OpenAI => "OpenAI",
            ApiProvider::Anthropic => "Anthropic",
            ApiProvider::OpenRouter => "OpenRouter",
            ApiProvider::Perplexity => "Perplexity",
            ApiProvider::Custom { .. } => "Custom",
        };
        ProviderInfo {
            name: name.to_string(),
            model: self.model.clone(),
            supports_functions: !matches!(self.provider, ApiProvider::Perplexity),
            supports_web_search: !matches!(self.provider, ApiProvider::Custom { .. }),
        }
    }
}
