//! Agent Framework - tool-calling conversational agent over the deal pipeline
//!
//! Architecture:
//! - AgentTool / ToolRegistry: named tools with JSON-schema parameters
//! - ToolLoop: bounded model → tools → model rounds with cancellation
//! - AgentRuntime: the analyst-facing agent (system policy + full catalog)
//! - AgentContext: per-invocation variables handed to tools

pub mod context;
pub mod data_tools;
pub mod note_tools;
pub mod runtime;
pub mod tool_loop;
pub mod tools;
pub mod web_tools;

pub use context::AgentContext;
pub use runtime::{AgentReply, AgentRuntime};
pub use tool_loop::{ToolInvocation, ToolLoop, ToolLoopConfig, ToolLoopResult, DEGRADED_ANSWER};
pub use tools::{
    parse_args, AgentTool, ToolDescription, ToolInput, ToolOutput, ToolRegistry, ToolServices,
};
