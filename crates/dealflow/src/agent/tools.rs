//! Agent Tools - the trait, the output union and the registry the agent dispatches through

use super::context::AgentContext;
use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DealflowConfig;
use crate::enrichment::CompanySearchProvider;
use crate::llm::{GenerationConfig, LLMProvider, ToolSchema};
use crate::store::DealStore;

/// Input for a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    /// Tool identifier
    pub tool_id: String,

    /// Arguments as sent by the model
    pub parameters: serde_json::Value,
}

impl ToolInput {
    pub fn new(tool_id: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            tool_id: tool_id.into(),
            parameters,
        }
    }
}

/// Result from tool execution.
///
/// Kept structured until it crosses into the model conversation, where
/// [`ToolOutput::to_markdown`] renders it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutput {
    Table {
        title: String,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Text(String),
    ErrorText(String),
}

impl ToolOutput {
    pub fn table(title: impl Into<String>, headers: &[&str], rows: Vec<Vec<String>>) -> Self {
        ToolOutput::Table {
            title: title.into(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        ToolOutput::Text(text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        ToolOutput::ErrorText(text.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutput::ErrorText(_))
    }

    pub fn to_markdown(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::ErrorText(text) => format!("Error: {}", text),
            ToolOutput::Table { title, headers, rows } => {
                let mut out = String::new();
                if !title.is_empty() {
                    out.push_str(&format!("### {}\n\n", title));
                }
                out.push_str(&markdown_row(headers));
                out.push_str(&format!("|{}\n", "---|".repeat(headers.len().max(1))));
                for row in rows {
                    out.push_str(&markdown_row(row));
                }
                out.push_str(&format!("\n{} row(s)", rows.len()));
                out
            }
        }
    }
}

fn markdown_row(cells: &[String]) -> String {
    let cells: Vec<String> = cells
        .iter()
        .map(|c| c.replace('|', "\\|").replace('\n', " "))
        .collect();
    format!("| {} |\n", cells.join(" | "))
}

/// Deserialize tool arguments into a typed struct; on failure the error text
/// goes straight back to the model.
pub fn parse_args<T: DeserializeOwned>(tool_id: &str, parameters: &serde_json::Value) -> Result<T, ToolOutput> {
    // Models sometimes send `null` for "no arguments".
    let value = if parameters.is_null() {
        serde_json::json!({})
    } else {
        parameters.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| ToolOutput::error(format!("Invalid arguments for {}: {}", tool_id, e)))
}

/// Trait for tools that agents can use
#[async_trait]
pub trait AgentTool: Send + Sync {
    /// Unique identifier for this tool (the name the model calls)
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Description of what this tool does
    fn description(&self) -> &str;

    /// Parameter schema (JSON Schema format)
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether the tool writes to the store or the enrichment cache
    fn writes(&self) -> bool {
        false
    }

    /// Execute the tool with given input
    async fn execute(&self, input: ToolInput, context: AgentContext) -> Result<ToolOutput>;
}

/// Dependencies shared by the built-in tools.
#[derive(Clone)]
pub struct ToolServices {
    pub store: Arc<dyn DealStore>,
    pub llm: Option<Arc<dyn LLMProvider>>,
    pub company_search: Option<Arc<dyn CompanySearchProvider>>,
    pub config: Arc<DealflowConfig>,
}

impl ToolServices {
    pub fn new(store: Arc<dyn DealStore>, config: Arc<DealflowConfig>) -> Self {
        Self {
            store,
            llm: None,
            company_search: None,
            config,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LLMProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_company_search(mut self, provider: Arc<dyn CompanySearchProvider>) -> Self {
        self.company_search = Some(provider);
        self
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig::from(&self.config.llm)
    }
}

/// Registry of available tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the full built-in catalog.
    pub fn with_builtin_tools(services: &ToolServices) -> Self {
        use super::data_tools::{
            CompanyDetailsTool, CompareHistoricalDealsTool, DescribeSchemaTool,
            PipelineStatisticsTool, QueryCompaniesTool, SearchNotesTool,
        };
        use super::note_tools::{AttachNoteTool, FindEntityMatchTool};
        use super::web_tools::{EnrichCompanyTool, SearchExternalCompaniesTool, WebSearchTool};

        let mut registry = Self::new();

        // Structured store
        registry.register(Arc::new(DescribeSchemaTool));
        registry.register(Arc::new(QueryCompaniesTool::new(services)));
        registry.register(Arc::new(PipelineStatisticsTool::new(services)));
        registry.register(Arc::new(CompanyDetailsTool::new(services)));
        registry.register(Arc::new(CompareHistoricalDealsTool::new(services)));
        registry.register(Arc::new(SearchNotesTool::new(services)));

        // Web and external data
        registry.register(Arc::new(WebSearchTool::new(services)));
        registry.register(Arc::new(SearchExternalCompaniesTool::new(services)));
        registry.register(Arc::new(EnrichCompanyTool::new(services)));

        // Note linking
        registry.register(Arc::new(FindEntityMatchTool::new(services)));
        registry.register(Arc::new(AttachNoteTool::new(services)));

        registry
    }

    /// A registry holding only the listed tools, for narrower agents.
    pub fn restricted(&self, tool_ids: &[&str]) -> Self {
        let tools = tool_ids
            .iter()
            .filter_map(|id| self.tools.get(*id).map(|t| (id.to_string(), t.clone())))
            .collect();
        Self { tools }
    }

    /// Register a tool
    pub fn register(&mut self, tool: Arc<dyn AgentTool>) {
        self.tools.insert(tool.id().to_string(), tool);
    }

    /// Get a tool by ID
    pub fn get(&self, tool_id: &str) -> Option<Arc<dyn AgentTool>> {
        self.tools.get(tool_id).cloned()
    }

    /// Tool IDs, sorted
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tools.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get tool descriptions for prompting, sorted by id
    pub fn get_tool_descriptions(&self) -> Vec<ToolDescription> {
        let mut descriptions: Vec<ToolDescription> = self
            .tools
            .values()
            .map(|tool| ToolDescription {
                id: tool.id().to_string(),
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters_schema: tool.parameters_schema(),
            })
            .collect();
        descriptions.sort_by(|a, b| a.id.cmp(&b.id));
        descriptions
    }

    /// Schemas handed to the model.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.get_tool_descriptions()
            .into_iter()
            .map(|d| ToolSchema {
                name: d.id,
                description: d.description,
                parameters: d.parameters_schema,
            })
            .collect()
    }
}

/// Tool description for LLM prompting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescription {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

// ---- formatting helpers shared by the tools ----

pub(crate) fn fmt_opt(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

/// Money-ish figures: thousands separators, no decimals past millions.
pub(crate) fn fmt_amount(value: Option<f64>) -> String {
    match value {
        None => "-".to_string(),
        Some(v) if v.abs() >= 1_000_000.0 => format!("{:.1}M", v / 1_000_000.0),
        Some(v) if v.abs() >= 1_000.0 => format!("{:.1}k", v / 1_000.0),
        Some(v) => format!("{:.2}", v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn services() -> ToolServices {
        ToolServices::new(Arc::new(InMemoryStore::new()), Arc::new(DealflowConfig::default()))
    }

    #[test]
    fn test_tool_registry() {
        let registry = ToolRegistry::with_builtin_tools(&services());

        assert!(registry.get("query_companies").is_some());
        assert!(registry.get("web_search").is_some());
        assert!(registry.get("attach_note").is_some());
        assert!(registry.get("rag_search").is_none());
        assert_eq!(registry.len(), 11);

        let schemas = registry.schemas();
        assert_eq!(schemas.len(), 11);
        assert!(schemas.iter().all(|s| s.parameters["type"] == "object"));
    }

    #[test]
    fn test_restricted_registry() {
        let registry = ToolRegistry::with_builtin_tools(&services());
        let narrow = registry.restricted(&["find_entity_match", "attach_note", "missing"]);
        assert_eq!(narrow.list(), vec!["attach_note", "find_entity_match"]);
    }

    #[test]
    fn test_only_enrichment_and_linking_write() {
        let registry = ToolRegistry::with_builtin_tools(&services());
        let mut writers: Vec<String> = registry
            .list()
            .into_iter()
            .filter(|id| registry.get(id).map(|t| t.writes()).unwrap_or(false))
            .collect();
        writers.sort();
        assert_eq!(writers, vec!["attach_note", "enrich_company", "search_external_companies"]);
    }

    #[test]
    fn test_table_markdown() {
        let out = ToolOutput::table(
            "Companies",
            &["Name", "Stage"],
            vec![vec!["A|B".into(), "L1".into()]],
        );
        let md = out.to_markdown();
        assert!(md.starts_with("### Companies"));
        assert!(md.contains("| Name | Stage |"));
        assert!(md.contains("A\\|B"));
        assert!(md.ends_with("1 row(s)"));
    }

    #[test]
    fn test_parse_args_reports_tool() {
        #[derive(Debug, Deserialize)]
        struct Args {
            #[allow(dead_code)]
            query: String,
        }
        let err = parse_args::<Args>("search_notes", &serde_json::json!({"q": 1})).unwrap_err();
        match err {
            ToolOutput::ErrorText(text) => assert!(text.starts_with("Invalid arguments for search_notes")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
