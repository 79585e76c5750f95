//! Document structuring: turn a raw meeting note into summary, key points,
//! action items and tags, linking the companies it mentions.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::context::{AgentContext, MEETING_NOTE_ID};
use crate::agent::tool_loop::{ToolLoop, ToolLoopConfig};
use crate::agent::tools::ToolRegistry;
use crate::config::DealflowConfig;
use crate::error::{AgentError, DocumentError, StoreError};
use crate::llm::{ChatMessage, GenerationConfig, LLMProvider};
use crate::parsing::first_fenced_block;
use crate::store::DealStore;
use crate::types::{LinkedEntity, ProcessingStatus};

pub const DOCUMENT_TOOLS: [&str; 2] = ["find_entity_match", "attach_note"];

const DOCUMENT_PROMPT: &str = "You structure M&A meeting notes.

For every company or deal named in the note, call find_entity_match with the name as written. \
If it returns a match, call attach_note with the returned id and type and the passage about it.
Hard rule: if you are unsure about a match, do NOT link it.

When done, reply with exactly one fenced JSON block:
```json
{
  \"summary\": \"two or three sentences\",
  \"key_points\": [\"...\"],
  \"action_items\": [\"...\"],
  \"tags\": [\"...\"],
  \"matched_companies\": [{\"id\": \"<uuid>\", \"name\": \"...\", \"type\": \"company\"}]
}
```";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StructuredDocument {
    Structured {
        summary: String,
        #[serde(default)]
        key_points: Vec<String>,
        #[serde(default)]
        action_items: Vec<String>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        matched_companies: Vec<LinkedEntity>,
    },
    /// The model's answer had no usable JSON block.
    Raw { raw_response: String },
}

#[derive(Debug, Deserialize)]
struct StructuredFields {
    summary: String,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    action_items: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    matched_companies: Vec<LinkedEntity>,
}

impl StructuredDocument {
    /// First fenced block parsed as the structured shape; anything else is `Raw`.
    pub fn from_response(text: &str) -> Self {
        let parsed = first_fenced_block(text)
            .and_then(|block| serde_json::from_str::<StructuredFields>(block).ok());
        match parsed {
            Some(f) => StructuredDocument::Structured {
                summary: f.summary,
                key_points: f.key_points,
                action_items: f.action_items,
                tags: f.tags,
                matched_companies: f.matched_companies,
            },
            None => StructuredDocument::Raw {
                raw_response: text.to_string(),
            },
        }
    }
}

#[derive(Clone)]
pub struct DocumentAgent {
    llm: Arc<dyn LLMProvider>,
    registry: ToolRegistry,
    store: Arc<dyn DealStore>,
    loop_config: ToolLoopConfig,
    generation: GenerationConfig,
}

impl DocumentAgent {
    /// `registry` may be the full catalog; only the linking tools are kept.
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        registry: &ToolRegistry,
        store: Arc<dyn DealStore>,
        config: &DealflowConfig,
    ) -> Self {
        Self {
            llm,
            registry: registry.restricted(&DOCUMENT_TOOLS),
            store,
            loop_config: ToolLoopConfig::from(&config.agent),
            generation: GenerationConfig::from(&config.llm),
        }
    }

    /// Structure `raw_text`. Linking tools see no meeting note id.
    pub async fn process(&self, raw_text: &str) -> Result<StructuredDocument, AgentError> {
        self.run(raw_text, AgentContext::new(), CancellationToken::new()).await
    }

    async fn run(
        &self,
        raw_text: &str,
        context: AgentContext,
        cancel: CancellationToken,
    ) -> Result<StructuredDocument, AgentError> {
        let mut messages = vec![
            ChatMessage::system(DOCUMENT_PROMPT),
            ChatMessage::user(format!("Meeting note:\n\n{}", raw_text)),
        ];
        let tool_loop = ToolLoop {
            llm: self.llm.as_ref(),
            registry: &self.registry,
            config: &self.loop_config,
            generation: &self.generation,
        };
        let result = tool_loop.run(&mut messages, &context, &cancel).await?;
        let document = StructuredDocument::from_response(&result.content);
        if matches!(document, StructuredDocument::Raw { .. }) {
            tracing::warn!(session = %context.session_id, "DocumentAgent: no JSON block, keeping raw response");
        }
        Ok(document)
    }

    /// Process a stored note: pending → processing → completed | failed.
    ///
    /// Returns `None` when the note was not pending (already claimed or done).
    /// Once claimed, the work runs on its own task: dropping the returned
    /// future does not abandon the note, and cancelling `cancel` saves it as
    /// failed.
    pub async fn process_note(
        &self,
        note_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<Option<StructuredDocument>, DocumentError> {
        if !self.store.claim_meeting_note(note_id).await? {
            tracing::info!(note = %note_id, "DocumentAgent: note not pending, skipping");
            return Ok(None);
        }
        let agent = self.clone();
        let handle = tokio::spawn(async move { agent.finish_note(note_id, cancel).await });
        match handle.await {
            Ok(outcome) => outcome.map(Some),
            Err(e) => {
                tracing::error!(note = %note_id, error = %e, "DocumentAgent: processing task died");
                Err(DocumentError::Task(e.to_string()))
            }
        }
    }

    async fn finish_note(&self, note_id: Uuid, cancel: CancellationToken) -> Result<StructuredDocument, DocumentError> {
        let mut note = match self.store.get_meeting_note(note_id).await? {
            Some(note) => note,
            None => return Err(StoreError::not_found("meeting note", note_id).into()),
        };

        let context = AgentContext::new().with_variable(MEETING_NOTE_ID, serde_json::json!(note_id.to_string()));
        let outcome = self
            .run(&note.raw_text, context, cancel)
            .await
            .map_err(DocumentError::from)
            .and_then(|document| Ok((serde_json::to_value(&document)?, document)));

        let result = match outcome {
            Ok((value, document)) => {
                note.structured_json = Some(value);
                if let StructuredDocument::Structured { tags, matched_companies, .. } = &document {
                    note.tags = tags.clone();
                    note.matched_companies = matched_companies.clone();
                }
                note.processing_status = ProcessingStatus::Completed;
                Ok(document)
            }
            Err(e) => {
                tracing::error!(note = %note_id, error = %e, "DocumentAgent: processing failed");
                note.processing_status = ProcessingStatus::Failed;
                Err(e)
            }
        };
        self.store.save_meeting_note(note).await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_response_structured() {
        let text = "Done.\n```json\n{\"summary\": \"Intro call\", \"tags\": [\"logistics\"]}\n```";
        match StructuredDocument::from_response(text) {
            StructuredDocument::Structured { summary, tags, key_points, .. } => {
                assert_eq!(summary, "Intro call");
                assert_eq!(tags, vec!["logistics"]);
                assert!(key_points.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_from_response_falls_back_to_raw() {
        for text in [
            "no block at all",
            "```json\n{not json}\n```",
            "```json\n{\"tags\": []}\n```",
        ] {
            assert_eq!(
                StructuredDocument::from_response(text),
                StructuredDocument::Raw { raw_response: text.to_string() }
            );
        }
    }
}
