//! Error types at the crate's public boundaries.
//!
//! Tool bodies and provider plumbing use `anyhow`; these enums are what the
//! store, the agent runtime and the screening workflow hand back to callers.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("constraint violated: {0}")]
    Conflict(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        StoreError::NotFound { entity, id }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model call failed: {0}")]
    Model(#[source] anyhow::Error),

    #[error("model call timed out after {0}s")]
    ModelTimeout(u64),

    #[error("request cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("failed to encode structured document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("note processing task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum ScreeningError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid criterion: {0}")]
    InvalidCriterion(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(String, #[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
