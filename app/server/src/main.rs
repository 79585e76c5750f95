//! dealflow-server: HTTP entry point.
//!
//! Environment: `DEALFLOW_CONFIG` (JSON config path), `DEALFLOW_ADDR`
//! (listen address, default 127.0.0.1:3460), `DATABASE_URL` (with the
//! `postgres` feature), plus the overrides read by `DealflowConfig::apply_env`.

mod routes;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use dealflow::enrichment::HttpCompanySearch;
use dealflow::{
    provider_from_config, AgentRuntime, DealStore, DealflowConfig, DocumentAgent, GenerationConfig,
    ProgressWatcher, ScreeningOrchestrator, ToolRegistry, ToolServices,
};

use routes::{create_router, AppState};

fn load_config() -> Result<DealflowConfig> {
    let config = match std::env::var("DEALFLOW_CONFIG") {
        Ok(path) => {
            let path = PathBuf::from(path);
            tracing::info!("Loading config from {:?}", path);
            DealflowConfig::from_file(&path)?
        }
        Err(_) => DealflowConfig::default(),
    };
    Ok(config.apply_env()?)
}

#[cfg(feature = "postgres")]
async fn open_store() -> Result<Arc<dyn DealStore>> {
    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let store = dealflow::PostgresStore::connect(&url, 10)
                .await
                .context("connecting to Postgres")?;
            store.migrate().await.context("running migrations")?;
            tracing::info!("Using Postgres store");
            Ok(Arc::new(store))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Ok(Arc::new(dealflow::InMemoryStore::new()))
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn open_store() -> Result<Arc<dyn DealStore>> {
    tracing::info!("Using in-memory store");
    Ok(Arc::new(dealflow::InMemoryStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Arc::new(load_config()?);
    let store = open_store().await?;

    let llm = provider_from_config(&config.llm).context("configuring LLM provider")?;
    match &llm {
        Some(provider) => tracing::info!("LLM provider: {}", provider.info().name),
        None => tracing::warn!("LLM disabled; chat, screening calls and note processing will fail"),
    }

    let mut services = ToolServices::new(store.clone(), config.clone());
    if let Some(provider) = &llm {
        services = services.with_llm(provider.clone());
    }
    if config.enrichment.api_key.is_some() {
        match HttpCompanySearch::new(&config.enrichment) {
            Ok(search) => services = services.with_company_search(Arc::new(search)),
            Err(e) => tracing::warn!("Company search disabled: {}", e),
        }
    }
    let registry = Arc::new(ToolRegistry::with_builtin_tools(&services));
    tracing::info!(tools = registry.len(), "Tool registry ready");

    let orchestrator = Arc::new(ScreeningOrchestrator::new(
        store.clone(),
        llm.clone(),
        config.screening.clone(),
        GenerationConfig::from(&config.llm),
    ));
    let progress = Arc::new(ProgressWatcher::spawn(
        store.clone(),
        config.screening.poll_interval(),
    ));

    let (assistant, documents) = match &llm {
        Some(provider) => (
            Some(Arc::new(AgentRuntime::new(provider.clone(), registry.clone(), &config))),
            Some(Arc::new(DocumentAgent::new(provider.clone(), &registry, store.clone(), &config))),
        ),
        None => (None, None),
    };

    let app = create_router(AppState {
        assistant,
        documents,
        orchestrator,
        progress,
    });

    let addr = std::env::var("DEALFLOW_ADDR").unwrap_or_else(|_| "127.0.0.1:3460".to_string());
    tracing::info!("dealflow API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
