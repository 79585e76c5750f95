//! Conversational assistant: system prompt + tool loop over the full catalog.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::context::AgentContext;
use super::tool_loop::{ToolInvocation, ToolLoop, ToolLoopConfig};
use super::tools::ToolRegistry;
use crate::config::DealflowConfig;
use crate::error::AgentError;
use crate::llm::{ChatMessage, ChatRole, GenerationConfig, LLMProvider};

const SYSTEM_PROMPT: &str = "You are an M&A analyst assistant for a deal pipeline. \
Companies move through stages L0 (sourcing) to L5 (closing).

Policy:
- Answer from the pipeline database first: use describe_schema if unsure of fields, then \
query_companies, pipeline_statistics, company_details, compare_historical_deals or search_notes.
- Use web_search only when the database lacks the data, or when the user asks for market \
context, benchmarks or comparisons with companies outside the pipeline.
- Use search_external_companies and enrich_company to look up companies that are not in the pipeline.
- Never invent figures. If a tool returns no results, say so.
- Present tabular data as markdown tables and cite web sources.";

/// Final answer of one assistant turn.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentReply {
    pub content: String,
    pub tool_invocations: Vec<ToolInvocation>,
    pub rounds: usize,
    pub degraded: bool,
}

pub struct AgentRuntime {
    llm: Arc<dyn LLMProvider>,
    registry: Arc<ToolRegistry>,
    loop_config: ToolLoopConfig,
    generation: GenerationConfig,
}

impl AgentRuntime {
    pub fn new(llm: Arc<dyn LLMProvider>, registry: Arc<ToolRegistry>, config: &DealflowConfig) -> Self {
        Self {
            llm,
            registry,
            loop_config: ToolLoopConfig::from(&config.agent),
            generation: GenerationConfig::from(&config.llm),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// The system prompt with the live tool catalog appended.
    pub fn system_prompt(&self) -> String {
        let mut prompt = String::from(SYSTEM_PROMPT);
        prompt.push_str("\n\nAvailable tools:\n");
        for tool in self.registry.get_tool_descriptions() {
            prompt.push_str(&format!("- {}: {}\n", tool.id, tool.description));
        }
        prompt
    }

    /// Answer the last user message of `history`.
    ///
    /// Caller-supplied system messages are dropped; the runtime owns the prompt.
    pub async fn invoke(
        &self,
        history: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> Result<AgentReply, AgentError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt()));
        messages.extend(history.into_iter().filter(|m| m.role != ChatRole::System));

        let context = AgentContext::new();
        tracing::info!(
            session = %context.session_id,
            history = messages.len() - 1,
            "AgentRuntime: invoke"
        );

        let tool_loop = ToolLoop {
            llm: self.llm.as_ref(),
            registry: &self.registry,
            config: &self.loop_config,
            generation: &self.generation,
        };
        let result = tool_loop.run(&mut messages, &context, &cancel).await?;

        tracing::info!(
            session = %context.session_id,
            rounds = result.iterations,
            tools = result.tool_invocations.len(),
            "AgentRuntime: answered"
        );
        Ok(AgentReply {
            content: result.content,
            tool_invocations: result.tool_invocations,
            rounds: result.iterations,
            degraded: result.hit_round_limit,
        })
    }

    /// Single-question convenience wrapper.
    pub async fn ask(&self, question: &str) -> Result<AgentReply, AgentError> {
        self.invoke(vec![ChatMessage::user(question)], CancellationToken::new())
            .await
    }
}
