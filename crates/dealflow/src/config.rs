use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::{ApiProvider, LLMConfig, LLMMode};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DealflowConfig {
    pub llm: LLMConfig,
    pub agent: AgentConfig,
    pub screening: ScreeningConfig,
    pub matcher: MatcherConfig,
    pub comparison: ComparisonWeights,
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum model → tools → model round-trips in one turn.
    pub max_tool_rounds: usize,
    pub model_timeout_secs: u64,
    pub tool_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    /// Concurrent LLM classification calls across all dispatches.
    pub max_concurrent: usize,
    pub classification_timeout_secs: u64,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Maximum accepted `1 - similarity`.
    pub threshold: f64,
}

/// Weights used when scoring historical deals against a company.
/// Business tuning only; normalised before use so they need not sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ComparisonWeights {
    pub enterprise_value: f64,
    pub revenue: f64,
    pub ebitda: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub default_limit: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 10,
            model_timeout_secs: 120,
            tool_timeout_secs: 60,
        }
    }
}

impl AgentConfig {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            classification_timeout_secs: 45,
            poll_interval_secs: 5,
        }
    }
}

impl ScreeningConfig {
    pub fn classification_timeout(&self) -> Duration {
        Duration::from_secs(self.classification_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { threshold: 0.3 }
    }
}

impl Default for ComparisonWeights {
    fn default() -> Self {
        Self {
            enterprise_value: 0.3,
            revenue: 0.3,
            ebitda: 0.4,
        }
    }
}

impl ComparisonWeights {
    /// Weights scaled to sum to 1.
    pub fn normalized(&self) -> (f64, f64, f64) {
        let total = self.enterprise_value + self.revenue + self.ebitda;
        if total <= 0.0 {
            return (1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);
        }
        (
            self.enterprise_value / total,
            self.revenue / total,
            self.ebitda / total,
        )
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.ocean.io/v2".to_string(),
            api_key: None,
            timeout_secs: 30,
            default_limit: 10,
        }
    }
}

impl DealflowConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid("agent.max_tool_rounds must be > 0".into()));
        }
        if self.agent.model_timeout_secs == 0 || self.agent.tool_timeout_secs == 0 {
            return Err(ConfigError::Invalid("agent timeouts must be > 0".into()));
        }
        if self.screening.max_concurrent == 0 {
            return Err(ConfigError::Invalid("screening.max_concurrent must be > 0".into()));
        }
        if self.screening.classification_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "screening.classification_timeout_secs must be > 0".into(),
            ));
        }
        if self.screening.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("screening.poll_interval_secs must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.matcher.threshold) {
            return Err(ConfigError::Invalid("matcher.threshold must be in [0.0, 1.0]".into()));
        }
        let w = &self.comparison;
        for weight in [w.enterprise_value, w.revenue, w.ebitda] {
            if !(weight >= 0.0) || !weight.is_finite() {
                return Err(ConfigError::Invalid("comparison weights must be finite and >= 0".into()));
            }
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay secrets and endpoints from the environment.
    ///
    /// `DEALFLOW_LLM_PROVIDER` (openai | anthropic | openrouter | perplexity),
    /// `DEALFLOW_LLM_MODEL`, `DEALFLOW_LLM_API_KEY`, `DEALFLOW_ENRICHMENT_URL`,
    /// `DEALFLOW_ENRICHMENT_API_KEY`.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(api_key) = std::env::var("DEALFLOW_LLM_API_KEY") {
            let provider = match std::env::var("DEALFLOW_LLM_PROVIDER") {
                Ok(name) => ApiProvider::from_name(&name)
                    .ok_or_else(|| ConfigError::Invalid(format!("unknown LLM provider '{}'", name)))?,
                Err(_) => ApiProvider::OpenAI,
            };
            let model = std::env::var("DEALFLOW_LLM_MODEL")
                .unwrap_or_else(|_| provider.default_model().to_string());
            self.llm.mode = LLMMode::External {
                provider,
                api_key,
                model,
            };
        }
        if let Ok(url) = std::env::var("DEALFLOW_ENRICHMENT_URL") {
            self.enrichment.base_url = url;
        }
        if let Ok(key) = std::env::var("DEALFLOW_ENRICHMENT_API_KEY") {
            self.enrichment.api_key = Some(key);
        }
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DealflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_tool_rounds, 10);
        assert_eq!(config.screening.max_concurrent, 5);
        assert_eq!(config.matcher.threshold, 0.3);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: DealflowConfig =
            serde_json::from_str(r#"{ "screening": { "max_concurrent": 8 } }"#).unwrap();
        assert_eq!(config.screening.max_concurrent, 8);
        assert_eq!(config.screening.classification_timeout_secs, 45);
        assert_eq!(config.comparison, ComparisonWeights::default());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let mut config = DealflowConfig::default();
        config.screening.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_finite_weights() {
        for bad in [f64::NAN, f64::INFINITY, -0.5] {
            let mut config = DealflowConfig::default();
            config.comparison.revenue = bad;
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "weight {} accepted",
                bad
            );
        }
    }

    #[test]
    fn test_weights_normalize() {
        let weights = ComparisonWeights { enterprise_value: 1.0, revenue: 1.0, ebitda: 2.0 };
        let (ev, rev, ebitda) = weights.normalized();
        assert!((ev - 0.25).abs() < 1e-9);
        assert!((rev - 0.25).abs() < 1e-9);
        assert!((ebitda - 0.5).abs() < 1e-9);
    }
}
