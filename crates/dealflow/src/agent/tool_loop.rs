//! ReAct Tool-Calling Loop
//!
//! Sends messages + tool schemas to the LLM, executes any requested tool calls,
//! feeds results back, and loops until the LLM produces a final text response.
//! Shared by the chat assistant and the document agent.

use futures::future::join_all;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::context::AgentContext;
use super::tools::{ToolInput, ToolRegistry};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::llm::{ChatMessage, ChatResponse, GenerationConfig, LLMProvider, ToolCall, ToolSchema};

/// Returned when the model still wants tools after the final tool-less call.
pub const DEGRADED_ANSWER: &str = "I was unable to complete the task within the allowed number of tool calls. \
     Here is what I found so far based on the tool results above.";

/// Configuration for the tool-calling loop.
#[derive(Debug, Clone)]
pub struct ToolLoopConfig {
    /// Maximum number of LLM round-trips (tool call → result → re-send).
    pub max_iterations: usize,
    /// Bound on each model call.
    pub model_timeout: Duration,
    /// Bound on each tool execution.
    pub tool_timeout: Duration,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for ToolLoopConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_tool_rounds,
            model_timeout: config.model_timeout(),
            tool_timeout: config.tool_timeout(),
        }
    }
}

/// A single tool invocation record for observability.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub result: String,
    pub success: bool,
    pub duration_ms: u64,
}

/// The final output of a tool-calling loop run.
#[derive(Debug, Clone)]
pub struct ToolLoopResult {
    /// The LLM's final text response.
    pub content: String,
    /// All tool invocations that occurred during the loop, in request order.
    pub tool_invocations: Vec<ToolInvocation>,
    /// Total number of LLM round-trips.
    pub iterations: usize,
    /// True when the round budget ran out.
    pub hit_round_limit: bool,
}

/// Everything one loop run needs besides the conversation.
pub struct ToolLoop<'a> {
    pub llm: &'a dyn LLMProvider,
    pub registry: &'a ToolRegistry,
    pub config: &'a ToolLoopConfig,
    pub generation: &'a GenerationConfig,
}

impl ToolLoop<'_> {
    /// Run the loop.
    ///
    /// 1. Send `messages` + the registry's schemas to the LLM.
    /// 2. `ToolCalls` → execute them concurrently → append results in request order → loop.
    /// 3. `Content` → done.
    ///
    /// `messages` is extended in place with every assistant and tool message.
    pub async fn run(
        &self,
        messages: &mut Vec<ChatMessage>,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Result<ToolLoopResult, AgentError> {
        let schemas = self.registry.schemas();
        let mut invocations = Vec::new();
        let mut iterations = 0;

        loop {
            iterations += 1;
            if iterations > self.config.max_iterations {
                tracing::warn!(
                    max = self.config.max_iterations,
                    "Tool loop hit max iterations, forcing text response"
                );
                // Ask LLM to respond without tools
                let content = match self.call_model(messages, &[], cancel).await? {
                    ChatResponse::Content(text) => text,
                    ChatResponse::ToolCalls(_) => DEGRADED_ANSWER.to_string(),
                };
                return Ok(ToolLoopResult {
                    content,
                    tool_invocations: invocations,
                    iterations,
                    hit_round_limit: true,
                });
            }

            tracing::debug!(iteration = iterations, "Tool loop: sending to LLM");

            match self.call_model(messages, &schemas, cancel).await? {
                ChatResponse::Content(text) => {
                    tracing::debug!(iteration = iterations, "Tool loop: LLM returned content, done");
                    return Ok(ToolLoopResult {
                        content: text,
                        tool_invocations: invocations,
                        iterations,
                        hit_round_limit: false,
                    });
                }
                ChatResponse::ToolCalls(tool_calls) => {
                    tracing::info!(
                        iteration = iterations,
                        count = tool_calls.len(),
                        tools = ?tool_calls.iter().map(|tc| &tc.name).collect::<Vec<_>>(),
                        "Tool loop: LLM requested tool calls"
                    );

                    messages.push(ChatMessage::assistant_tool_calls(tool_calls.clone()));

                    let batch = join_all(tool_calls.iter().map(|tc| self.execute_tool_call(tc, context)));
                    let results = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                        results = batch => results,
                    };

                    for (tc, invocation) in tool_calls.iter().zip(results) {
                        messages.push(ChatMessage::tool_result(&tc.id, &tc.name, &invocation.result));
                        invocations.push(invocation);
                    }
                }
            }
        }
    }

    async fn call_model(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        let call = tokio::time::timeout(
            self.config.model_timeout,
            self.llm.chat(messages, tools, self.generation),
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            outcome = call => match outcome {
                Err(_) => Err(AgentError::ModelTimeout(self.config.model_timeout.as_secs())),
                Ok(Err(e)) => Err(AgentError::Model(e)),
                Ok(Ok(response)) => Ok(response),
            },
        }
    }

    /// Execute a single tool call against the registry. Never fails: every
    /// problem becomes error text for the model.
    async fn execute_tool_call(&self, tool_call: &ToolCall, context: &AgentContext) -> ToolInvocation {
        let start = Instant::now();
        let parsed: Result<serde_json::Value, _> = if tool_call.arguments.trim().is_empty() {
            Ok(serde_json::json!({}))
        } else {
            serde_json::from_str(&tool_call.arguments)
        };

        let (result, success) = match (self.registry.get(&tool_call.name), parsed.as_ref()) {
            (None, _) => (format!("Error: unknown tool '{}'", tool_call.name), false),
            (Some(_), Err(e)) => (
                format!("Error: Invalid arguments for {}: malformed JSON ({})", tool_call.name, e),
                false,
            ),
            (Some(tool), Ok(parameters)) => {
                let input = ToolInput::new(tool_call.name.clone(), parameters.clone());
                match tokio::time::timeout(self.config.tool_timeout, tool.execute(input, context.clone())).await {
                    Ok(Ok(output)) => (output.to_markdown(), !output.is_error()),
                    Ok(Err(e)) => {
                        tracing::warn!(tool = %tool_call.name, error = %e, "Tool execution failed");
                        (format!("Error: tool '{}' failed: {}", tool_call.name, e), false)
                    }
                    Err(_) => (
                        format!(
                            "Error: tool '{}' timed out after {}s",
                            tool_call.name,
                            self.config.tool_timeout.as_secs()
                        ),
                        false,
                    ),
                }
            }
        };

        ToolInvocation {
            tool_name: tool_call.name.clone(),
            arguments: parsed.unwrap_or(serde_json::json!({})),
            result,
            success,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}
