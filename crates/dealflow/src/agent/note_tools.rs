//! Tools the document agent uses to link a meeting note to pipeline entities.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::context::AgentContext;
use super::tools::{parse_args, AgentTool, ToolInput, ToolOutput, ToolServices};
use crate::matcher;
use crate::store::DealStore;
use crate::types::{EntityKind, EntityNote};

// ==================== find_entity_match ====================

#[derive(Debug, Deserialize)]
struct FindEntityArgs {
    name: String,
    #[serde(default)]
    threshold: Option<f64>,
}

pub struct FindEntityMatchTool {
    store: Arc<dyn DealStore>,
    threshold: f64,
}

impl FindEntityMatchTool {
    pub fn new(services: &ToolServices) -> Self {
        Self {
            store: services.store.clone(),
            threshold: services.config.matcher.threshold,
        }
    }
}

#[async_trait]
impl AgentTool for FindEntityMatchTool {
    fn id(&self) -> &str {
        "find_entity_match"
    }

    fn name(&self) -> &str {
        "Find Entity Match"
    }

    fn description(&self) -> &str {
        "Find the pipeline company or historical deal whose name best matches a name \
        mentioned in a document. Returns id, name, type and similarity, or no match."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Name as written in the document" },
                "threshold": {
                    "type": "number",
                    "description": "Maximum accepted distance (0 = exact only)",
                    "default": 0.3
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, input: ToolInput, _context: AgentContext) -> Result<ToolOutput> {
        let args: FindEntityArgs = match parse_args(self.id(), &input.parameters) {
            Ok(args) => args,
            Err(output) => return Ok(output),
        };
        let threshold = args.threshold.unwrap_or(self.threshold).clamp(0.0, 1.0);

        match matcher::find_best_match(self.store.as_ref(), &args.name, threshold).await? {
            Some(m) => Ok(ToolOutput::text(serde_json::to_string(&m)?)),
            None => Ok(ToolOutput::text(format!(
                "No matching company or historical deal found for '{}'.",
                args.name
            ))),
        }
    }
}

// ==================== attach_note ====================

#[derive(Debug, Deserialize)]
struct AttachNoteArgs {
    entity_id: Uuid,
    #[serde(alias = "type")]
    entity_type: EntityKind,
    excerpt: String,
    #[serde(default)]
    meeting_note_id: Option<Uuid>,
}

pub struct AttachNoteTool {
    store: Arc<dyn DealStore>,
}

impl AttachNoteTool {
    pub fn new(services: &ToolServices) -> Self {
        Self { store: services.store.clone() }
    }
}

#[async_trait]
impl AgentTool for AttachNoteTool {
    fn id(&self) -> &str {
        "attach_note"
    }

    fn name(&self) -> &str {
        "Attach Note"
    }

    fn description(&self) -> &str {
        "Attach an excerpt of the current meeting note to a company or historical deal. \
        Only call this for entities confirmed by find_entity_match."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "entity_id": { "type": "string", "description": "id returned by find_entity_match" },
                "entity_type": { "type": "string", "enum": ["company", "historical_deal"] },
                "excerpt": { "type": "string", "description": "The relevant passage or a short summary" }
            },
            "required": ["entity_id", "entity_type", "excerpt"]
        })
    }

    fn writes(&self) -> bool {
        true
    }

    async fn execute(&self, input: ToolInput, context: AgentContext) -> Result<ToolOutput> {
        let args: AttachNoteArgs = match parse_args(self.id(), &input.parameters) {
            Ok(args) => args,
            Err(output) => return Ok(output),
        };
        if args.excerpt.trim().is_empty() {
            return Ok(ToolOutput::error("attach_note needs a non-empty 'excerpt'"));
        }

        let name = match args.entity_type {
            EntityKind::Company => self.store.get_company(args.entity_id).await?.map(|c| c.name),
            EntityKind::HistoricalDeal => self
                .store
                .get_historical_deal(args.entity_id)
                .await?
                .map(|d| d.name),
        };
        let Some(name) = name else {
            return Ok(ToolOutput::error(format!(
                "No {} found with id {}",
                args.entity_type, args.entity_id
            )));
        };

        let note = EntityNote {
            id: Uuid::new_v4(),
            entity_id: args.entity_id,
            entity_kind: args.entity_type,
            meeting_note_id: context.meeting_note_id().or(args.meeting_note_id),
            excerpt: args.excerpt.trim().to_string(),
            created_at: Utc::now(),
        };
        self.store.insert_entity_note(note).await?;
        tracing::info!(entity = %args.entity_id, kind = %args.entity_type, "AttachNoteTool: note attached");

        Ok(ToolOutput::text(format!("Attached note to {} '{}'.", args.entity_type, name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::context::MEETING_NOTE_ID;
    use crate::config::DealflowConfig;
    use crate::store::InMemoryStore;
    use crate::types::{Company, MatchResult};

    fn services() -> ToolServices {
        ToolServices::new(Arc::new(InMemoryStore::new()), Arc::new(DealflowConfig::default()))
    }

    #[tokio::test]
    async fn test_find_entity_match_returns_json() {
        let services = services();
        let company = services.store.upsert_company(Company::new("Helios Energy")).await.unwrap();
        let tool = FindEntityMatchTool::new(&services);

        let out = tool
            .execute(ToolInput::new("find_entity_match", serde_json::json!({ "name": "helios energy" })), AgentContext::new())
            .await
            .unwrap();
        let ToolOutput::Text(text) = out else { panic!("expected text") };
        let m: MatchResult = serde_json::from_str(&text).unwrap();
        assert_eq!(m.id, company.id);
        assert_eq!(m.similarity, 1.0);
    }

    #[tokio::test]
    async fn test_attach_note_uses_context_note_id() {
        let services = services();
        let company = services.store.upsert_company(Company::new("Helios Energy")).await.unwrap();
        let note_id = Uuid::new_v4();
        let ctx = AgentContext::new().with_variable(MEETING_NOTE_ID, serde_json::json!(note_id.to_string()));

        let tool = AttachNoteTool::new(&services);
        let out = tool
            .execute(
                ToolInput::new(
                    "attach_note",
                    serde_json::json!({ "entity_id": company.id, "entity_type": "company", "excerpt": "Board approves sale." }),
                ),
                ctx,
            )
            .await
            .unwrap();
        assert!(!out.is_error());

        let notes = services.store.list_entity_notes(company.id).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].meeting_note_id, Some(note_id));
    }

    #[tokio::test]
    async fn test_attach_note_rejects_unknown_entity() {
        let tool = AttachNoteTool::new(&services());
        let out = tool
            .execute(
                ToolInput::new(
                    "attach_note",
                    serde_json::json!({ "entity_id": Uuid::new_v4(), "entity_type": "historical_deal", "excerpt": "x" }),
                ),
                AgentContext::new(),
            )
            .await
            .unwrap();
        assert!(out.is_error());
    }
}
