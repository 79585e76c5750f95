//! External company-search provider.
//!
//! Results are cached in the store by the calling tools; this module only
//! speaks HTTP and maps the provider's records onto [`CompanyProfile`].

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::EnrichmentConfig;
use crate::types::CompanyProfile;

#[async_trait]
pub trait CompanySearchProvider: Send + Sync {
    /// Free-text company search ("logistics software companies in the Nordics").
    async fn search(&self, prompt: &str, limit: usize) -> Result<Vec<CompanyProfile>>;

    /// Detail lookup by provider id. Unknown ids are omitted from the result.
    async fn fetch(&self, provider_ids: &[String]) -> Result<Vec<CompanyProfile>>;
}

pub struct HttpCompanySearch {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCompanySearch {
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("enrichment API key is not configured"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("x-api-token", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let preview: String = text.chars().take(300).collect();
            return Err(anyhow!("company search API error {}: {}", status, preview));
        }
        serde_json::from_str(&text)
            .map_err(|e| anyhow!("company search API returned invalid JSON: {}", e))
    }
}

#[async_trait]
impl CompanySearchProvider for HttpCompanySearch {
    async fn search(&self, prompt: &str, limit: usize) -> Result<Vec<CompanyProfile>> {
        let body = json!({
            "size": limit,
            "companiesFilters": { "prompt": prompt },
        });
        let value = self.post("/search/companies", body).await?;
        let profiles = parse_companies(&value);
        tracing::info!(prompt = %prompt, results = profiles.len(), "Company search complete");
        Ok(profiles)
    }

    async fn fetch(&self, provider_ids: &[String]) -> Result<Vec<CompanyProfile>> {
        if provider_ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = json!({ "companyIds": provider_ids });
        let value = self.post("/enrich/companies", body).await?;
        Ok(parse_companies(&value))
    }
}

/// Accepts `{"companies": [...]}`, `{"data": [...]}` or a bare array; entries may
/// wrap the record in a `company` object.
fn parse_companies(value: &Value) -> Vec<CompanyProfile> {
    let items = value
        .get("companies")
        .or_else(|| value.get("data"))
        .unwrap_or(value)
        .as_array()
        .cloned()
        .unwrap_or_default();

    items
        .iter()
        .filter_map(|item| profile_from_json(item.get("company").unwrap_or(item)))
        .collect()
}

fn profile_from_json(record: &Value) -> Option<CompanyProfile> {
    let str_field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| record.get(*k).and_then(Value::as_str))
            .map(|s| s.to_string())
    };

    let provider_id = str_field(&["id", "domain"])?;
    let name = str_field(&["name", "legalName"])?;
    let sector = str_field(&["industry", "sector"]).or_else(|| {
        record
            .get("industries")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    });
    let employees = record
        .get("employees")
        .or_else(|| record.get("employeeCount"))
        .and_then(|v| v.as_u64().or_else(|| v.get("count").and_then(Value::as_u64)));
    let revenue = record
        .get("revenue")
        .and_then(|v| v.as_f64().or_else(|| v.get("amount").and_then(Value::as_f64)));

    Some(CompanyProfile {
        provider_id,
        name,
        domain: str_field(&["domain"]),
        country: str_field(&["country", "countryCode"]),
        sector,
        employees,
        revenue,
        description: str_field(&["description"]),
        raw: record.clone(),
        fetched_at: Utc::now(),
    })
}
