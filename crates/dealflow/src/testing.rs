//! Offline stand-ins for the LLM and the company-search provider.
//!
//! Used by the unit and integration tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::enrichment::CompanySearchProvider;
use crate::llm::{
    ChatMessage, ChatResponse, GenerationConfig, LLMProvider, ProviderInfo, ToolCall, ToolSchema,
    WebSearchAnswer, WebSource,
};
use crate::types::CompanyProfile;

type Responder = Box<dyn Fn(&[ChatMessage]) -> Result<ChatResponse> + Send + Sync>;

enum Mode {
    /// Pop one response per call; error once exhausted.
    Script(Mutex<VecDeque<ChatResponse>>),
    /// Compute the response from the conversation.
    Responder(Responder),
    /// Every call fails with this message.
    Failing(String),
}

/// One `chat` call as the provider saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
}

pub struct ScriptedProvider {
    mode: Mode,
    delay: Option<Duration>,
    web_answer: Option<WebSearchAnswer>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self::with_mode(Mode::Script(Mutex::new(responses.into())))
    }

    pub fn responder<F>(f: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Result<ChatResponse> + Send + Sync + 'static,
    {
        Self::with_mode(Mode::Responder(Box::new(f)))
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_mode(Mode::Failing(message.into()))
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            delay: None,
            web_answer: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_web_answer(mut self, text: &str, sources: &[(&str, &str)]) -> Self {
        self.web_answer = Some(WebSearchAnswer {
            text: text.to_string(),
            sources: sources
                .iter()
                .map(|(title, url)| WebSource {
                    title: Some(title.to_string()),
                    url: url.to_string(),
                })
                .collect(),
        });
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        _config: &GenerationConfig,
    ) -> Result<ChatResponse> {
        self.calls.lock().push(RecordedCall {
            messages: messages.to_vec(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.mode {
            Mode::Script(queue) => queue
                .lock()
                .pop_front()
                .ok_or_else(|| anyhow!("scripted provider has no responses left")),
            Mode::Responder(f) => f(messages),
            Mode::Failing(message) => Err(anyhow!("{}", message)),
        }
    }

    async fn web_search(&self, _query: &str, _config: &GenerationConfig) -> Result<WebSearchAnswer> {
        self.web_answer
            .clone()
            .ok_or_else(|| anyhow!("web search not scripted"))
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "scripted".to_string(),
            model: "scripted".to_string(),
            supports_functions: true,
            supports_web_search: self.web_answer.is_some(),
        }
    }
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

pub fn sample_profile(provider_id: &str, name: &str) -> CompanyProfile {
    CompanyProfile {
        provider_id: provider_id.to_string(),
        name: name.to_string(),
        domain: None,
        country: Some("SE".to_string()),
        sector: Some("Industrials".to_string()),
        employees: Some(250),
        revenue: Some(30_000_000.0),
        description: None,
        raw: serde_json::json!({ "id": provider_id, "name": name }),
        fetched_at: Utc::now(),
    }
}

/// In-memory company search over a fixed catalog; counts its calls.
pub struct MockCompanySearch {
    catalog: Vec<CompanyProfile>,
    search_calls: AtomicUsize,
    fetched: Mutex<Vec<String>>,
}

impl MockCompanySearch {
    pub fn new(catalog: Vec<CompanyProfile>) -> Self {
        Self {
            catalog,
            search_calls: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    /// Every id passed to `fetch`, in call order.
    pub fn fetched_ids(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl CompanySearchProvider for MockCompanySearch {
    async fn search(&self, prompt: &str, limit: usize) -> Result<Vec<CompanyProfile>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let needle = prompt.to_lowercase();
        Ok(self
            .catalog
            .iter()
            .filter(|p| p.name.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch(&self, provider_ids: &[String]) -> Result<Vec<CompanyProfile>> {
        self.fetched.lock().extend(provider_ids.iter().cloned());
        Ok(self
            .catalog
            .iter()
            .filter(|p| provider_ids.contains(&p.provider_id))
            .cloned()
            .collect())
    }
}
