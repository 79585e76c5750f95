pub mod agent;
pub mod config;
pub mod documents;
pub mod enrichment;
pub mod error;
pub mod llm;
pub mod matcher;
pub mod parsing;
pub mod screening;
pub mod store;
pub mod types;

// Scripted providers and fixtures shared by unit and integration tests.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export primary types for convenience
pub use agent::{AgentReply, AgentRuntime, ToolRegistry, ToolServices};
pub use config::DealflowConfig;
pub use documents::{DocumentAgent, StructuredDocument};
pub use enrichment::{CompanySearchProvider, HttpCompanySearch};
pub use error::{AgentError, ConfigError, DocumentError, ScreeningError, StoreError};
pub use screening::{
    CompanyScreeningSummary, ProgressWatcher, ScreeningOrchestrator, ScreeningProgress,
};
pub use store::{DealStore, InMemoryStore, StoreEvent};
#[cfg(feature = "postgres")]
pub use store::PostgresStore;
pub use types::{
    Company, Criterion, EntityKind, HistoricalDeal, MatchResult, MeetingNote, Screening,
    ScreeningResult, ScreeningState, Stage,
};

// Re-export LLM types
pub use llm::{
    provider_from_config, ApiProvider, ChatMessage, ChatResponse, GenerationConfig, LLMConfig,
    LLMMode, LLMProvider,
};

// Re-export common types
pub use anyhow::{Error, Result};
pub use uuid::Uuid;
