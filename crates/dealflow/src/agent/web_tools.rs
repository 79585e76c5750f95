//! Tools that reach outside the structured store: LLM web search and the
//! external company-search provider (cache-first).

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

use super::context::AgentContext;
use super::tools::{fmt_amount, fmt_opt, parse_args, AgentTool, ToolInput, ToolOutput, ToolServices};
use crate::enrichment::CompanySearchProvider;
use crate::llm::{GenerationConfig, LLMProvider};
use crate::store::DealStore;
use crate::types::CompanyProfile;

// ==================== web_search ====================

#[derive(Debug, Deserialize)]
struct WebSearchArgs {
    query: String,
}

pub struct WebSearchTool {
    llm: Option<Arc<dyn LLMProvider>>,
    generation: GenerationConfig,
}

impl WebSearchTool {
    pub fn new(services: &ToolServices) -> Self {
        Self {
            llm: services.llm.clone(),
            generation: services.generation_config(),
        }
    }
}

#[async_trait]
impl AgentTool for WebSearchTool {
    fn id(&self) -> &str {
        "web_search"
    }

    fn name(&self) -> &str {
        "Web Search"
    }

    fn description(&self) -> &str {
        "Search the web for current market information, news, valuations or benchmarks \
        that are not in the pipeline database. Returns a summary with sources."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to search for" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: ToolInput, _context: AgentContext) -> Result<ToolOutput> {
        let args: WebSearchArgs = match parse_args(self.id(), &input.parameters) {
            Ok(args) => args,
            Err(output) => return Ok(output),
        };
        if args.query.trim().is_empty() {
            return Ok(ToolOutput::error("web_search needs a non-empty 'query'"));
        }
        let Some(llm) = &self.llm else {
            return Ok(ToolOutput::error("Web search is not available: no LLM provider configured."));
        };

        let answer = match llm.web_search(&args.query, &self.generation).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(query = %args.query, error = %e, "WebSearchTool: search failed");
                return Ok(ToolOutput::error(format!("Web search failed: {}", e)));
            }
        };

        if answer.text.trim().is_empty() && answer.sources.is_empty() {
            return Ok(ToolOutput::text(format!("No web results found for '{}'.", args.query)));
        }

        let mut text = answer.text.trim().to_string();
        if !answer.sources.is_empty() {
            text.push_str("\n\nSources:\n");
            for (i, source) in answer.sources.iter().enumerate() {
                match &source.title {
                    Some(title) => text.push_str(&format!("[{}] {} - {}\n", i + 1, title, source.url)),
                    None => text.push_str(&format!("[{}] {}\n", i + 1, source.url)),
                }
            }
        }
        tracing::info!(query = %args.query, sources = answer.sources.len(), "WebSearchTool: done");
        Ok(ToolOutput::text(text))
    }
}

// ==================== search_external_companies ====================

#[derive(Debug, Deserialize)]
struct SearchExternalArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    /// Skip the cache and ask the provider.
    #[serde(default)]
    refresh: bool,
}

pub struct SearchExternalCompaniesTool {
    store: Arc<dyn DealStore>,
    provider: Option<Arc<dyn CompanySearchProvider>>,
    default_limit: usize,
}

impl SearchExternalCompaniesTool {
    pub fn new(services: &ToolServices) -> Self {
        Self {
            store: services.store.clone(),
            provider: services.company_search.clone(),
            default_limit: services.config.enrichment.default_limit,
        }
    }
}

const PROFILE_HEADERS: [&str; 7] = ["Name", "Provider ID", "Domain", "Country", "Sector", "Employees", "Revenue"];

fn profile_row(p: &CompanyProfile) -> Vec<String> {
    vec![
        p.name.clone(),
        p.provider_id.clone(),
        fmt_opt(p.domain.as_deref()),
        fmt_opt(p.country.as_deref()),
        fmt_opt(p.sector.as_deref()),
        p.employees.map(|e| e.to_string()).unwrap_or_else(|| "-".into()),
        fmt_amount(p.revenue),
    ]
}

async fn cache_profiles(store: &dyn DealStore, profiles: &[CompanyProfile]) -> Result<()> {
    for profile in profiles {
        store.upsert_profile(profile.clone()).await?;
    }
    Ok(())
}

#[async_trait]
impl AgentTool for SearchExternalCompaniesTool {
    fn id(&self) -> &str {
        "search_external_companies"
    }

    fn name(&self) -> &str {
        "Search External Companies"
    }

    fn description(&self) -> &str {
        "Find companies outside the pipeline in the external company database, by name or \
        description. Previously fetched companies are served from the local cache."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Company name or description" },
                "limit": { "type": "integer", "default": 10 },
                "refresh": { "type": "boolean", "default": false }
            },
            "required": ["query"]
        })
    }

    fn writes(&self) -> bool {
        true
    }

    async fn execute(&self, input: ToolInput, _context: AgentContext) -> Result<ToolOutput> {
        let args: SearchExternalArgs = match parse_args(self.id(), &input.parameters) {
            Ok(args) => args,
            Err(output) => return Ok(output),
        };
        let query = args.query.trim();
        if query.is_empty() {
            return Ok(ToolOutput::error("search_external_companies needs a non-empty 'query'"));
        }
        let limit = args.limit.unwrap_or(self.default_limit).max(1);

        if !args.refresh {
            let cached = self.store.find_profiles_by_name(query).await?;
            if !cached.is_empty() {
                tracing::debug!(query, hits = cached.len(), "SearchExternalCompaniesTool: cache hit");
                let rows = cached.iter().take(limit).map(profile_row).collect();
                return Ok(ToolOutput::table(
                    format!("External companies matching '{}' (cached)", query),
                    &PROFILE_HEADERS,
                    rows,
                ));
            }
        }

        let Some(provider) = &self.provider else {
            return Ok(ToolOutput::error("External company search is not configured."));
        };
        let profiles = match provider.search(query, limit).await {
            Ok(profiles) => profiles,
            Err(e) => return Ok(ToolOutput::error(format!("External company search failed: {}", e))),
        };
        if profiles.is_empty() {
            return Ok(ToolOutput::text(format!("No external companies found for '{}'.", query)));
        }
        cache_profiles(self.store.as_ref(), &profiles).await?;

        let rows = profiles.iter().take(limit).map(profile_row).collect();
        Ok(ToolOutput::table(
            format!("External companies matching '{}'", query),
            &PROFILE_HEADERS,
            rows,
        ))
    }
}

// ==================== enrich_company ====================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EnrichArgs {
    provider_ids: Vec<String>,
    provider_id: Option<String>,
}

pub struct EnrichCompanyTool {
    store: Arc<dyn DealStore>,
    provider: Option<Arc<dyn CompanySearchProvider>>,
}

impl EnrichCompanyTool {
    pub fn new(services: &ToolServices) -> Self {
        Self {
            store: services.store.clone(),
            provider: services.company_search.clone(),
        }
    }
}

fn describe_profile(p: &CompanyProfile) -> String {
    format!(
        "## {} ({})\nDomain: {} | Country: {} | Sector: {}\nEmployees: {} | Revenue: {}\n{}\n",
        p.name,
        p.provider_id,
        fmt_opt(p.domain.as_deref()),
        fmt_opt(p.country.as_deref()),
        fmt_opt(p.sector.as_deref()),
        p.employees.map(|e| e.to_string()).unwrap_or_else(|| "-".into()),
        fmt_amount(p.revenue),
        p.description.clone().unwrap_or_default(),
    )
}

#[async_trait]
impl AgentTool for EnrichCompanyTool {
    fn id(&self) -> &str {
        "enrich_company"
    }

    fn name(&self) -> &str {
        "Enrich Company"
    }

    fn description(&self) -> &str {
        "Fetch detailed profiles (domain, sector, headcount, revenue, description) for \
        external companies by provider id, as returned by search_external_companies."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "provider_ids": { "type": "array", "items": { "type": "string" } },
                "provider_id": { "type": "string" }
            }
        })
    }

    fn writes(&self) -> bool {
        true
    }

    async fn execute(&self, input: ToolInput, _context: AgentContext) -> Result<ToolOutput> {
        let args: EnrichArgs = match parse_args(self.id(), &input.parameters) {
            Ok(args) => args,
            Err(output) => return Ok(output),
        };
        let mut ids: Vec<String> = args
            .provider_ids
            .into_iter()
            .chain(args.provider_id)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        let mut seen = HashSet::new();
        ids.retain(|id| seen.insert(id.clone()));
        if ids.is_empty() {
            return Ok(ToolOutput::error("enrich_company needs 'provider_ids' or 'provider_id'"));
        }

        let mut found: Vec<CompanyProfile> = Vec::new();
        let mut missing: Vec<String> = Vec::new();
        for id in &ids {
            match self.store.get_profile(id).await? {
                Some(profile) => found.push(profile),
                None => missing.push(id.clone()),
            }
        }

        if !missing.is_empty() {
            match &self.provider {
                Some(provider) => match provider.fetch(&missing).await {
                    Ok(fetched) => {
                        cache_profiles(self.store.as_ref(), &fetched).await?;
                        found.extend(fetched);
                    }
                    Err(e) if found.is_empty() => {
                        return Ok(ToolOutput::error(format!("Company enrichment failed: {}", e)))
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, missing = missing.len(), "EnrichCompanyTool: partial fetch failure");
                    }
                },
                None if found.is_empty() => {
                    return Ok(ToolOutput::error("External company enrichment is not configured."))
                }
                None => {}
            }
        }

        if found.is_empty() {
            return Ok(ToolOutput::text(format!("No company profiles found for {}.", ids.join(", "))));
        }
        Ok(ToolOutput::text(
            found.iter().map(describe_profile).collect::<Vec<_>>().join("\n"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DealflowConfig;
    use crate::store::InMemoryStore;
    use crate::testing::{sample_profile, MockCompanySearch, ScriptedProvider};

    fn services(search: Arc<MockCompanySearch>) -> ToolServices {
        ToolServices::new(Arc::new(InMemoryStore::new()), Arc::new(DealflowConfig::default()))
            .with_company_search(search)
    }

    #[tokio::test]
    async fn test_search_external_is_cache_first() {
        let search = Arc::new(MockCompanySearch::new(vec![sample_profile("oc-1", "Acme Robotics")]));
        let services = services(search.clone());
        let tool = SearchExternalCompaniesTool::new(&services);
        let input = ToolInput::new("search_external_companies", serde_json::json!({ "query": "Acme" }));

        let first = tool.execute(input.clone(), AgentContext::new()).await.unwrap();
        assert!(matches!(first, ToolOutput::Table { .. }));
        assert_eq!(search.search_calls(), 1);
        assert!(services.store.get_profile("oc-1").await.unwrap().is_some());

        let second = tool.execute(input, AgentContext::new()).await.unwrap();
        match second {
            ToolOutput::Table { title, .. } => assert!(title.ends_with("(cached)")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(search.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_enrich_fetches_only_missing() {
        let search = Arc::new(MockCompanySearch::new(vec![
            sample_profile("oc-1", "Acme Robotics"),
            sample_profile("oc-2", "Beta Marine"),
        ]));
        let services = services(search.clone());
        services.store.upsert_profile(sample_profile("oc-1", "Acme Robotics")).await.unwrap();

        let tool = EnrichCompanyTool::new(&services);
        let input = ToolInput::new("enrich_company", serde_json::json!({ "provider_ids": ["oc-1", "oc-2"] }));
        let out = tool.execute(input, AgentContext::new()).await.unwrap();
        match out {
            ToolOutput::Text(text) => {
                assert!(text.contains("Acme Robotics"));
                assert!(text.contains("Beta Marine"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(search.fetched_ids(), vec!["oc-2".to_string()]);
    }

    #[tokio::test]
    async fn test_enrich_fetches_repeated_ids_once() {
        let search = Arc::new(MockCompanySearch::new(vec![
            sample_profile("oc-1", "Acme Robotics"),
            sample_profile("oc-2", "Beta Marine"),
        ]));
        let services = services(search.clone());
        let tool = EnrichCompanyTool::new(&services);
        let input = ToolInput::new(
            "enrich_company",
            serde_json::json!({ "provider_ids": ["oc-1", "oc-2", " oc-1"], "provider_id": "oc-2" }),
        );

        let out = tool.execute(input, AgentContext::new()).await.unwrap();
        let text = out.to_markdown();
        assert_eq!(text.matches("Acme Robotics").count(), 1);
        assert_eq!(text.matches("Beta Marine").count(), 1);
        assert_eq!(search.fetched_ids(), vec!["oc-1".to_string(), "oc-2".to_string()]);
    }

    #[tokio::test]
    async fn test_web_search_lists_sources() {
        let llm = Arc::new(ScriptedProvider::new(vec![]).with_web_answer(
            "Median EV/EBITDA for logistics was 9.1x.",
            &[("Deal report", "https://example.com/report")],
        ));
        let services = ToolServices::new(Arc::new(InMemoryStore::new()), Arc::new(DealflowConfig::default()))
            .with_llm(llm);
        let tool = WebSearchTool::new(&services);
        let out = tool
            .execute(ToolInput::new("web_search", serde_json::json!({ "query": "logistics multiples" })), AgentContext::new())
            .await
            .unwrap();
        match out {
            ToolOutput::Text(text) => assert!(text.contains("[1] Deal report - https://example.com/report")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
