//! HTTP routes over the screening orchestrator, the assistant and the
//! document agent.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use dealflow::agent::AgentReply;
use dealflow::screening::{LaunchReport, PromotionOutcome};
use dealflow::{
    AgentError, AgentRuntime, ChatMessage, CompanyScreeningSummary, Criterion, DocumentAgent,
    DocumentError, ProgressWatcher, ScreeningError, ScreeningOrchestrator, ScreeningProgress,
    StoreError, StructuredDocument,
};

#[derive(Clone)]
pub struct AppState {
    /// `None` when no LLM is configured.
    pub assistant: Option<Arc<AgentRuntime>>,
    pub documents: Option<Arc<DocumentAgent>>,
    pub orchestrator: Arc<ScreeningOrchestrator>,
    pub progress: Arc<ProgressWatcher>,
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    fn llm_disabled() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "no LLM provider is configured")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        let status = match e {
            AgentError::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
            AgentError::ModelTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AgentError::Model(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match e {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<ScreeningError> for ApiError {
    fn from(e: ScreeningError) -> Self {
        match e {
            ScreeningError::Store(e) => e.into(),
            ScreeningError::InvalidCriterion(_) => Self::new(StatusCode::BAD_REQUEST, e.to_string()),
        }
    }
}

impl From<DocumentError> for ApiError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::Store(e) => e.into(),
            DocumentError::Agent(e) => e.into(),
            DocumentError::Serialize(_) | DocumentError::Task(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> ApiResult<AgentReply> {
    let assistant = state.assistant.as_ref().ok_or_else(ApiError::llm_disabled)?;
    if req.messages.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "messages must not be empty"));
    }
    // A client disconnect drops this future; the guard cancels in-flight work.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let reply = assistant.invoke(req.messages, cancel).await?;
    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
pub struct CriterionRequest {
    pub name: String,
    pub prompt: String,
}

async fn list_criteria(State(state): State<AppState>) -> ApiResult<Vec<Criterion>> {
    Ok(Json(state.orchestrator.list_criteria().await?))
}

async fn create_criterion(
    State(state): State<AppState>,
    Json(req): Json<CriterionRequest>,
) -> Result<(StatusCode, Json<Criterion>), ApiError> {
    let criterion = state.orchestrator.create_criterion(&req.name, &req.prompt).await?;
    Ok((StatusCode::CREATED, Json(criterion)))
}

async fn update_criterion(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CriterionRequest>,
) -> ApiResult<Criterion> {
    Ok(Json(state.orchestrator.update_criterion(id, &req.name, &req.prompt).await?))
}

async fn delete_criterion(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    if state.orchestrator.delete_criterion(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::new(StatusCode::NOT_FOUND, format!("criterion {} not found", id)))
    }
}

#[derive(Debug, Deserialize)]
pub struct LaunchRequest {
    pub company_ids: Vec<Uuid>,
    /// All criteria when omitted.
    #[serde(default)]
    pub criteria_ids: Option<Vec<Uuid>>,
}

async fn launch_screening(
    State(state): State<AppState>,
    Json(req): Json<LaunchRequest>,
) -> Result<(StatusCode, Json<LaunchReport>), ApiError> {
    let mut criteria = state.orchestrator.list_criteria().await?;
    if let Some(ids) = &req.criteria_ids {
        let unknown: Vec<String> = ids
            .iter()
            .filter(|id| !criteria.iter().any(|c| c.id == **id))
            .map(|id| id.to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                format!("unknown criteria: {}", unknown.join(", ")),
            ));
        }
        criteria.retain(|c| ids.contains(&c.id));
    }
    if criteria.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "no screening criteria defined"));
    }

    let report = state.orchestrator.launch_screening(&req.company_ids, &criteria).await;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

async fn screening_progress(State(state): State<AppState>) -> Json<ScreeningProgress> {
    Json(state.progress.current())
}

async fn company_summary(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<CompanyScreeningSummary> {
    Ok(Json(state.orchestrator.summary(id).await?))
}

async fn promote_company(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<PromotionOutcome> {
    Ok(Json(state.orchestrator.move_to_l1(id).await?))
}

#[derive(Debug, Serialize)]
pub struct ProcessNoteResponse {
    pub note_id: Uuid,
    /// `None` when the note had already been picked up.
    pub document: Option<StructuredDocument>,
}

async fn process_note(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<ProcessNoteResponse> {
    let documents = state.documents.as_ref().ok_or_else(ApiError::llm_disabled)?;
    // No drop guard: a claimed note finishes even if the client goes away.
    let document = documents.process_note(id, CancellationToken::new()).await?;
    Ok(Json(ProcessNoteResponse { note_id: id, document }))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "llm": state.assistant.is_some(),
        "tools": state.assistant.as_ref().map(|a| a.registry().list()).unwrap_or_default(),
    }))
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/chat", post(chat))
        // Criteria
        .route("/criteria", get(list_criteria).post(create_criterion))
        .route("/criteria/:id", put(update_criterion).delete(delete_criterion))
        // Screening
        .route("/screenings", post(launch_screening))
        .route("/screenings/progress", get(screening_progress))
        .route("/companies/:id/screening", get(company_summary))
        .route("/companies/:id/promote", post(promote_company))
        // Documents
        .route("/notes/:id/process", post(process_note))
        .layer(cors)
        .with_state(state)
}
