//! Agent Context - per-invocation values handed to every tool call

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Variable carrying the meeting note a document run is working on.
pub const MEETING_NOTE_ID: &str = "meeting_note_id";

/// Context for one agent invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    /// Session ID for tracing
    pub session_id: String,

    /// Values set by the caller and readable by tools
    pub variables: HashMap<String, serde_json::Value>,
}

impl AgentContext {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            variables: HashMap::new(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    pub fn get_variable(&self, key: &str) -> Option<&serde_json::Value> {
        self.variables.get(key)
    }

    /// The meeting note bound to this run, if any.
    pub fn meeting_note_id(&self) -> Option<Uuid> {
        self.get_variable(MEETING_NOTE_ID)
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

impl Default for AgentContext {
    fn default() -> Self {
        Self::new()
    }
}
