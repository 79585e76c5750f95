//! Read-only tools over the structured store.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::context::AgentContext;
use super::tools::{fmt_amount, fmt_opt, parse_args, AgentTool, ToolInput, ToolOutput, ToolServices};
use crate::config::ComparisonWeights;
use crate::matcher;
use crate::store::DealStore;
use crate::types::{Company, EntityKind, HistoricalDeal, Stage};

// ==================== describe_schema ====================

pub struct DescribeSchemaTool;

#[async_trait]
impl AgentTool for DescribeSchemaTool {
    fn id(&self) -> &str {
        "describe_schema"
    }

    fn name(&self) -> &str {
        "Describe Schema"
    }

    fn description(&self) -> &str {
        "Describe the collections and fields available in the deal pipeline database, \
        including the valid pipeline stage values. Call this before building queries \
        if unsure which fields exist."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _input: ToolInput, _context: AgentContext) -> Result<ToolOutput> {
        let stages: Vec<&str> = Stage::ALL.iter().map(|s| s.as_str()).collect();
        let text = format!(
            "## companies\n\
             id, name, sector, segment, country, financials (per year: year, revenue, ebitda), \
             enterprise_value, focus, stage, status, active\n\
             stage is one of: {stages}\n\n\
             ## historical_deals\n\
             id, name, target, acquirer, sector, announced_year, enterprise_value, revenue, ebitda, description\n\n\
             ## criteria\n\
             id, name, prompt\n\n\
             ## screenings\n\
             company_id, criteria_id, state (pending | completed | failed), \
             result (pass | fail | inconclusive | error), remarks\n\n\
             ## meeting_notes\n\
             id, file_name, raw_text, tags, matched_companies, processing_status\n\n\
             ## entity_notes\n\
             entity_id, entity_kind (company | historical_deal), meeting_note_id, excerpt\n\n\
             Amounts are in the company's reporting currency. Revenue and EBITDA filters use \
             the most recent year with figures.",
            stages = stages.join(", ")
        );
        Ok(ToolOutput::text(text))
    }
}

// ==================== query_companies ====================

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct QueryCompaniesArgs {
    sector: Option<String>,
    stage: Option<String>,
    country: Option<String>,
    name_contains: Option<String>,
    min_revenue: Option<f64>,
    max_revenue: Option<f64>,
    min_enterprise_value: Option<f64>,
    max_enterprise_value: Option<f64>,
    sort_by: Option<String>,
    descending: bool,
    limit: Option<usize>,
    include_inactive: bool,
}

const MAX_QUERY_ROWS: usize = 200;

pub struct QueryCompaniesTool {
    store: Arc<dyn DealStore>,
}

impl QueryCompaniesTool {
    pub fn new(services: &ToolServices) -> Self {
        Self { store: services.store.clone() }
    }
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(&needle.trim().to_lowercase()))
        .unwrap_or(false)
}

fn in_range(value: Option<f64>, min: Option<f64>, max: Option<f64>) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    match value {
        None => false,
        Some(v) => min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m),
    }
}

fn company_row(c: &Company) -> Vec<String> {
    vec![
        c.name.clone(),
        c.id.to_string(),
        fmt_opt(c.sector.as_deref()),
        fmt_opt(c.country.as_deref()),
        c.stage.to_string(),
        fmt_amount(c.latest_revenue()),
        fmt_amount(c.latest_ebitda()),
        fmt_amount(c.enterprise_value),
        fmt_opt(c.status.as_deref()),
    ]
}

const COMPANY_HEADERS: [&str; 9] = [
    "Name", "ID", "Sector", "Country", "Stage", "Revenue", "EBITDA", "EV", "Status",
];

#[async_trait]
impl AgentTool for QueryCompaniesTool {
    fn id(&self) -> &str {
        "query_companies"
    }

    fn name(&self) -> &str {
        "Query Companies"
    }

    fn description(&self) -> &str {
        "Query pipeline companies with filters (sector, stage, country, name, revenue and \
        enterprise value ranges), sorting and a row limit. Use this first for any question \
        about companies in the pipeline."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "sector": { "type": "string", "description": "Sector contains (case-insensitive)" },
                "stage": { "type": "string", "enum": ["L0", "L1", "L2", "L3", "L4", "L5"] },
                "country": { "type": "string" },
                "name_contains": { "type": "string" },
                "min_revenue": { "type": "number" },
                "max_revenue": { "type": "number" },
                "min_enterprise_value": { "type": "number" },
                "max_enterprise_value": { "type": "number" },
                "sort_by": {
                    "type": "string",
                    "enum": ["name", "revenue", "ebitda", "enterprise_value", "stage"],
                    "default": "name"
                },
                "descending": { "type": "boolean", "default": false },
                "limit": { "type": "integer", "default": 25, "maximum": MAX_QUERY_ROWS },
                "include_inactive": { "type": "boolean", "default": false }
            }
        })
    }

    async fn execute(&self, input: ToolInput, _context: AgentContext) -> Result<ToolOutput> {
        let args: QueryCompaniesArgs = match parse_args(self.id(), &input.parameters) {
            Ok(args) => args,
            Err(output) => return Ok(output),
        };
        let stage = match args.stage.as_deref().map(str::parse::<Stage>).transpose() {
            Ok(stage) => stage,
            Err(e) => return Ok(ToolOutput::error(format!("Invalid arguments for query_companies: {}", e))),
        };

        let mut companies: Vec<Company> = self
            .store
            .list_companies()
            .await?
            .into_iter()
            .filter(|c| args.include_inactive || c.active)
            .filter(|c| stage.map_or(true, |s| c.stage == s))
            .filter(|c| args.sector.as_deref().map_or(true, |s| contains_ci(c.sector.as_deref(), s)))
            .filter(|c| args.country.as_deref().map_or(true, |s| contains_ci(c.country.as_deref(), s)))
            .filter(|c| args.name_contains.as_deref().map_or(true, |s| contains_ci(Some(&c.name), s)))
            .filter(|c| in_range(c.latest_revenue(), args.min_revenue, args.max_revenue))
            .filter(|c| in_range(c.enterprise_value, args.min_enterprise_value, args.max_enterprise_value))
            .collect();

        if companies.is_empty() {
            return Ok(ToolOutput::text("No companies found matching the given filters."));
        }

        let by_amount = |f: fn(&Company) -> Option<f64>| {
            move |a: &Company, b: &Company| {
                f(a).unwrap_or(f64::MIN)
                    .partial_cmp(&f(b).unwrap_or(f64::MIN))
                    .unwrap_or(std::cmp::Ordering::Equal)
            }
        };
        match args.sort_by.as_deref().unwrap_or("name") {
            "revenue" => companies.sort_by(by_amount(Company::latest_revenue)),
            "ebitda" => companies.sort_by(by_amount(Company::latest_ebitda)),
            "enterprise_value" => companies.sort_by(by_amount(|c| c.enterprise_value)),
            "stage" => companies.sort_by_key(|c| c.stage),
            _ => companies.sort_by_key(|c| c.name.to_lowercase()),
        }
        if args.descending {
            companies.reverse();
        }

        let total = companies.len();
        let limit = args.limit.unwrap_or(25).clamp(1, MAX_QUERY_ROWS);
        let rows: Vec<Vec<String>> = companies.iter().take(limit).map(company_row).collect();
        let title = if total > rows.len() {
            format!("Companies (showing {} of {})", rows.len(), total)
        } else {
            "Companies".to_string()
        };
        Ok(ToolOutput::table(title, &COMPANY_HEADERS, rows))
    }
}

// ==================== pipeline_statistics ====================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct PipelineStatisticsArgs {
    sector: Option<String>,
}

pub struct PipelineStatisticsTool {
    store: Arc<dyn DealStore>,
}

impl PipelineStatisticsTool {
    pub fn new(services: &ToolServices) -> Self {
        Self { store: services.store.clone() }
    }
}

#[derive(Default)]
struct Aggregate {
    count: usize,
    revenue_sum: f64,
    revenue_n: usize,
    ev_sum: f64,
    ev_n: usize,
}

impl Aggregate {
    fn add(&mut self, c: &Company) {
        self.count += 1;
        if let Some(r) = c.latest_revenue() {
            self.revenue_sum += r;
            self.revenue_n += 1;
        }
        if let Some(ev) = c.enterprise_value {
            self.ev_sum += ev;
            self.ev_n += 1;
        }
    }

    fn row(&self, label: &str) -> Vec<String> {
        let avg = |sum: f64, n: usize| if n == 0 { None } else { Some(sum / n as f64) };
        vec![
            label.to_string(),
            self.count.to_string(),
            fmt_amount((self.revenue_n > 0).then_some(self.revenue_sum)),
            fmt_amount(avg(self.revenue_sum, self.revenue_n)),
            fmt_amount((self.ev_n > 0).then_some(self.ev_sum)),
            fmt_amount(avg(self.ev_sum, self.ev_n)),
        ]
    }
}

#[async_trait]
impl AgentTool for PipelineStatisticsTool {
    fn id(&self) -> &str {
        "pipeline_statistics"
    }

    fn name(&self) -> &str {
        "Pipeline Statistics"
    }

    fn description(&self) -> &str {
        "Aggregate statistics over active pipeline companies: counts per stage and per \
        sector, revenue and enterprise value totals and averages. Optionally limited to a sector."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "sector": { "type": "string", "description": "Only companies whose sector contains this" }
            }
        })
    }

    async fn execute(&self, input: ToolInput, _context: AgentContext) -> Result<ToolOutput> {
        let args: PipelineStatisticsArgs = match parse_args(self.id(), &input.parameters) {
            Ok(args) => args,
            Err(output) => return Ok(output),
        };
        let companies: Vec<Company> = self
            .store
            .list_companies()
            .await?
            .into_iter()
            .filter(|c| c.active)
            .filter(|c| args.sector.as_deref().map_or(true, |s| contains_ci(c.sector.as_deref(), s)))
            .collect();

        if companies.is_empty() {
            return Ok(ToolOutput::text("No companies found in the pipeline for these statistics."));
        }

        let mut total = Aggregate::default();
        let mut by_stage: BTreeMap<Stage, Aggregate> = Stage::ALL.iter().map(|s| (*s, Aggregate::default())).collect();
        let mut by_sector: BTreeMap<String, Aggregate> = BTreeMap::new();
        for c in &companies {
            total.add(c);
            by_stage.entry(c.stage).or_default().add(c);
            by_sector
                .entry(c.sector.clone().unwrap_or_else(|| "(none)".to_string()))
                .or_default()
                .add(c);
        }

        let mut rows = vec![total.row("All")];
        rows.extend(by_stage.iter().map(|(stage, agg)| agg.row(&format!("Stage {}", stage))));
        rows.extend(by_sector.iter().map(|(sector, agg)| agg.row(&format!("Sector {}", sector))));

        Ok(ToolOutput::table(
            "Pipeline statistics",
            &["Group", "Companies", "Revenue total", "Revenue avg", "EV total", "EV avg"],
            rows,
        ))
    }
}

// ==================== company_details ====================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CompanyDetailsArgs {
    id: Option<Uuid>,
    name: Option<String>,
}

pub struct CompanyDetailsTool {
    store: Arc<dyn DealStore>,
    threshold: f64,
}

impl CompanyDetailsTool {
    pub fn new(services: &ToolServices) -> Self {
        Self {
            store: services.store.clone(),
            threshold: services.config.matcher.threshold,
        }
    }

    async fn describe_company(&self, company: &Company) -> Result<String> {
        let mut out = format!("## {} ({})\n", company.name, company.id);
        out.push_str(&format!(
            "Stage: {} | Status: {} | Active: {}\nSector: {} / {} | Country: {}\nEnterprise value: {}\n",
            company.stage,
            fmt_opt(company.status.as_deref()),
            company.active,
            fmt_opt(company.sector.as_deref()),
            fmt_opt(company.segment.as_deref()),
            fmt_opt(company.country.as_deref()),
            fmt_amount(company.enterprise_value),
        ));
        if let Some(focus) = &company.focus {
            out.push_str(&format!("Focus: {}\n", focus));
        }

        if !company.financials.is_empty() {
            let mut years = company.financials.clone();
            years.sort_by_key(|f| f.year);
            out.push_str("\n### Financials\n| Year | Revenue | EBITDA |\n|---|---|---|\n");
            for f in years {
                out.push_str(&format!("| {} | {} | {} |\n", f.year, fmt_amount(f.revenue), fmt_amount(f.ebitda)));
            }
        }

        let screenings = self.store.list_screenings_for_company(company.id).await?;
        if !screenings.is_empty() {
            let criteria = self.store.list_criteria().await?;
            out.push_str("\n### Screenings\n");
            for s in screenings {
                let criterion = criteria
                    .iter()
                    .find(|c| c.id == s.criteria_id)
                    .map(|c| c.name.as_str())
                    .unwrap_or("(deleted criterion)");
                out.push_str(&format!(
                    "- {}: {} / {}{}\n",
                    criterion,
                    s.state().as_str(),
                    s.result().map(|r| r.as_str()).unwrap_or("-"),
                    s.remarks().map(|r| format!(" ({})", r)).unwrap_or_default(),
                ));
            }
        }

        out.push_str(&self.describe_notes(company.id).await?);
        Ok(out)
    }

    fn describe_deal(deal: &HistoricalDeal) -> String {
        format!(
            "## Historical deal: {} ({})\nTarget: {} | Acquirer: {} | Sector: {} | Year: {}\n\
             EV: {} | Revenue: {} | EBITDA: {}\n{}",
            deal.name,
            deal.id,
            fmt_opt(deal.target.as_deref()),
            fmt_opt(deal.acquirer.as_deref()),
            fmt_opt(deal.sector.as_deref()),
            deal.announced_year.map(|y| y.to_string()).unwrap_or_else(|| "-".into()),
            fmt_amount(deal.enterprise_value),
            fmt_amount(deal.revenue),
            fmt_amount(deal.ebitda),
            deal.description.clone().unwrap_or_default(),
        )
    }

    async fn describe_notes(&self, entity_id: Uuid) -> Result<String> {
        let notes = self.store.list_entity_notes(entity_id).await?;
        if notes.is_empty() {
            return Ok(String::new());
        }
        let mut out = String::from("\n### Notes\n");
        for n in notes {
            out.push_str(&format!("- {}: {}\n", n.created_at.format("%Y-%m-%d"), n.excerpt));
        }
        Ok(out)
    }
}

#[async_trait]
impl AgentTool for CompanyDetailsTool {
    fn id(&self) -> &str {
        "company_details"
    }

    fn name(&self) -> &str {
        "Company Details"
    }

    fn description(&self) -> &str {
        "Full detail for one company or historical deal, by id or (fuzzy) name: \
        financials per year, stage, screening results and attached notes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Company or deal UUID" },
                "name": { "type": "string", "description": "Name, matched approximately" }
            }
        })
    }

    async fn execute(&self, input: ToolInput, _context: AgentContext) -> Result<ToolOutput> {
        let args: CompanyDetailsArgs = match parse_args(self.id(), &input.parameters) {
            Ok(args) => args,
            Err(output) => return Ok(output),
        };

        let (id, kind) = match (args.id, args.name.as_deref()) {
            (Some(id), _) => (id, None),
            (None, Some(name)) if !name.trim().is_empty() => {
                match matcher::find_best_match(self.store.as_ref(), name, self.threshold).await? {
                    Some(m) => (m.id, Some(m.kind)),
                    None => {
                        return Ok(ToolOutput::text(format!(
                            "No company or historical deal found matching '{}'.",
                            name
                        )))
                    }
                }
            }
            _ => return Ok(ToolOutput::error("company_details needs an 'id' or a 'name'")),
        };

        if kind != Some(EntityKind::HistoricalDeal) {
            if let Some(company) = self.store.get_company(id).await? {
                return Ok(ToolOutput::text(self.describe_company(&company).await?));
            }
        }
        if let Some(deal) = self.store.get_historical_deal(id).await? {
            let mut text = Self::describe_deal(&deal);
            text.push_str(&self.describe_notes(deal.id).await?);
            return Ok(ToolOutput::text(text));
        }
        Ok(ToolOutput::text(format!("No company or historical deal found with id {}.", id)))
    }
}

// ==================== compare_historical_deals ====================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CompareArgs {
    company_id: Option<Uuid>,
    company_name: Option<String>,
    limit: Option<usize>,
}

pub struct CompareHistoricalDealsTool {
    store: Arc<dyn DealStore>,
    weights: ComparisonWeights,
    threshold: f64,
}

impl CompareHistoricalDealsTool {
    pub fn new(services: &ToolServices) -> Self {
        Self {
            store: services.store.clone(),
            weights: services.config.comparison.clone(),
            threshold: services.config.matcher.threshold,
        }
    }
}

/// `1 - |a - b| / max(|a|, |b|)`, clamped to `[0, 1]`.
fn closeness(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        return 1.0;
    }
    (1.0 - (a - b).abs() / scale).clamp(0.0, 1.0)
}

/// Weighted closeness over the metrics both sides report, re-normalized by the
/// weights actually used. `None` when no metric is comparable.
pub fn deal_similarity(company: &Company, deal: &HistoricalDeal, weights: &ComparisonWeights) -> Option<f64> {
    let (w_ev, w_rev, w_ebitda) = weights.normalized();
    let pairs = [
        (company.enterprise_value, deal.enterprise_value, w_ev),
        (company.latest_revenue(), deal.revenue, w_rev),
        (company.latest_ebitda(), deal.ebitda, w_ebitda),
    ];
    let mut score = 0.0;
    let mut used = 0.0;
    for (a, b, w) in pairs {
        if let (Some(a), Some(b)) = (a, b) {
            score += w * closeness(a, b);
            used += w;
        }
    }
    (used > 0.0).then(|| score / used)
}

#[async_trait]
impl AgentTool for CompareHistoricalDealsTool {
    fn id(&self) -> &str {
        "compare_historical_deals"
    }

    fn name(&self) -> &str {
        "Compare Historical Deals"
    }

    fn description(&self) -> &str {
        "Rank historical deals by how closely their enterprise value, revenue and EBITDA \
        match a pipeline company. Use for benchmark or precedent-transaction questions."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "company_id": { "type": "string" },
                "company_name": { "type": "string" },
                "limit": { "type": "integer", "default": 5 }
            }
        })
    }

    async fn execute(&self, input: ToolInput, _context: AgentContext) -> Result<ToolOutput> {
        let args: CompareArgs = match parse_args(self.id(), &input.parameters) {
            Ok(args) => args,
            Err(output) => return Ok(output),
        };

        let company = match (args.company_id, args.company_name.as_deref()) {
            (Some(id), _) => self.store.get_company(id).await?,
            (None, Some(name)) => match matcher::find_best_match(self.store.as_ref(), name, self.threshold).await? {
                Some(m) if m.kind == EntityKind::Company => self.store.get_company(m.id).await?,
                _ => None,
            },
            (None, None) => {
                return Ok(ToolOutput::error("compare_historical_deals needs 'company_id' or 'company_name'"))
            }
        };
        let Some(company) = company else {
            return Ok(ToolOutput::text("No matching company found to compare against."));
        };

        let mut scored: Vec<(f64, HistoricalDeal)> = self
            .store
            .list_historical_deals()
            .await?
            .into_iter()
            .filter_map(|d| deal_similarity(&company, &d, &self.weights).map(|s| (s, d)))
            .collect();

        if scored.is_empty() {
            return Ok(ToolOutput::text(format!(
                "No historical deals found with figures comparable to {}.",
                company.name
            )));
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let rows = scored
            .iter()
            .take(args.limit.unwrap_or(5).max(1))
            .map(|(score, d)| {
                vec![
                    d.name.clone(),
                    fmt_opt(d.sector.as_deref()),
                    d.announced_year.map(|y| y.to_string()).unwrap_or_else(|| "-".into()),
                    fmt_amount(d.enterprise_value),
                    fmt_amount(d.revenue),
                    fmt_amount(d.ebitda),
                    format!("{:.2}", score),
                ]
            })
            .collect();

        Ok(ToolOutput::table(
            format!(
                "Historical deals closest to {} (EV {}, revenue {}, EBITDA {})",
                company.name,
                fmt_amount(company.enterprise_value),
                fmt_amount(company.latest_revenue()),
                fmt_amount(company.latest_ebitda()),
            ),
            &["Deal", "Sector", "Year", "EV", "Revenue", "EBITDA", "Similarity"],
            rows,
        ))
    }
}

// ==================== search_notes ====================

#[derive(Debug, Deserialize)]
struct SearchNotesArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct SearchNotesTool {
    store: Arc<dyn DealStore>,
}

impl SearchNotesTool {
    pub fn new(services: &ToolServices) -> Self {
        Self { store: services.store.clone() }
    }
}

fn matches_all(text: &str, terms: &[String]) -> bool {
    let text = text.to_lowercase();
    terms.iter().all(|t| text.contains(t))
}

fn snippet(text: &str, terms: &[String], width: usize) -> String {
    let lower = text.to_lowercase();
    let start = terms
        .iter()
        .filter_map(|t| lower.find(t))
        .min()
        .unwrap_or(0);
    // Offsets are counted in chars so the cut never splits a code point.
    let start_char = lower[..start].chars().count().saturating_sub(width / 4);
    let piece: String = text.chars().skip(start_char).take(width).collect();
    let piece = piece.replace('\n', " ");
    if start_char > 0 {
        format!("…{}", piece.trim())
    } else {
        piece.trim().to_string()
    }
}

#[async_trait]
impl AgentTool for SearchNotesTool {
    fn id(&self) -> &str {
        "search_notes"
    }

    fn name(&self) -> &str {
        "Search Notes"
    }

    fn description(&self) -> &str {
        "Keyword search over meeting notes and the note excerpts attached to companies \
        and historical deals. All words must appear."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Keywords" },
                "limit": { "type": "integer", "default": 10 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: ToolInput, _context: AgentContext) -> Result<ToolOutput> {
        let args: SearchNotesArgs = match parse_args(self.id(), &input.parameters) {
            Ok(args) => args,
            Err(output) => return Ok(output),
        };
        let terms: Vec<String> = args
            .query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        if terms.is_empty() {
            return Ok(ToolOutput::error("search_notes needs a non-empty 'query'"));
        }

        let mut rows = Vec::new();
        for note in self.store.list_meeting_notes().await? {
            let haystack = format!("{} {} {}", note.file_name, note.tags.join(" "), note.raw_text);
            if matches_all(&haystack, &terms) {
                rows.push(vec![
                    "meeting note".to_string(),
                    note.file_name.clone(),
                    note.created_at.format("%Y-%m-%d").to_string(),
                    snippet(&note.raw_text, &terms, 200),
                ]);
            }
        }
        for note in self.store.list_all_entity_notes().await? {
            if matches_all(&note.excerpt, &terms) {
                rows.push(vec![
                    note.entity_kind.to_string(),
                    note.entity_id.to_string(),
                    note.created_at.format("%Y-%m-%d").to_string(),
                    snippet(&note.excerpt, &terms, 200),
                ]);
            }
        }

        if rows.is_empty() {
            return Ok(ToolOutput::text(format!("No notes found matching '{}'.", args.query)));
        }
        rows.truncate(args.limit.unwrap_or(10).max(1));
        Ok(ToolOutput::table(
            format!("Notes matching '{}'", args.query),
            &["Source", "Reference", "Date", "Excerpt"],
            rows,
        ))
    }
}
