use crate::api::ws::ws_handler;
use crate::{HubHandle, LifecycleManager, Metrics};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use taskhub_core::{Error, Priority, Task, TaskDraft, TaskId, TaskStatus, UserId};
use taskhub_store::TaskFilter;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

/// Shared state handed to every handler.
pub struct AppState {
    pub lifecycle: LifecycleManager,
    pub hub: HubHandle,
    pub metrics: Arc<Metrics>,
    /// Outbound buffer capacity for new notification sessions.
    pub session_buffer: usize,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/tasks", post(submit_task).get(list_tasks))
        .route("/api/v1/tasks/:task_id", get(get_task).delete(cancel_task))
        .route("/api/v1/stats", get(get_stats))
        .route("/internal/v1/reports/claimed", post(report_claimed))
        .route("/internal/v1/reports/completed", post(report_completed))
        .route("/internal/v1/reports/failed", post(report_failed))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Authenticated owner id, resolved upstream by the identity layer and
/// attached to each request as the `x-user-id` header.
pub struct Owner(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<UserId>().ok())
            .map(Owner)
            .ok_or(ApiError::Unauthorized)
    }
}

#[derive(Debug, Deserialize)]
struct SubmitTaskRequest {
    name: String,
    #[serde(rename = "type")]
    task_type: String,
    priority: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ListTasksQuery {
    status: Option<String>,
    #[serde(rename = "type")]
    task_type: Option<String>,
    priority: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ClaimedReport {
    message_id: String,
    worker_id: String,
}

#[derive(Debug, Deserialize)]
struct CompletedReport {
    message_id: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct FailedReport {
    message_id: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct ReportResponse {
    /// False when the report was a duplicate or targeted a settled task;
    /// both are normal under at-least-once delivery.
    applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    task: Option<Task>,
}

/// Submit a new task.
async fn submit_task(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let priority = Priority::parse(&req.priority)?;
    let task = state
        .lifecycle
        .submit(
            owner.0,
            TaskDraft {
                name: req.name,
                task_type: req.task_type,
                priority,
                payload: req.payload,
            },
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

/// List the owner's tasks with optional filtering.
async fn list_tasks(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|s| TaskStatus::from_str(s).ok_or_else(|| ApiError::BadRequest(format!("unknown status {s:?}"))))
        .transpose()?;
    let priority = query
        .priority
        .as_deref()
        .map(Priority::parse)
        .transpose()?;

    let filter = TaskFilter {
        status,
        task_type: query.task_type,
        priority,
        limit: query.limit.unwrap_or(50).min(100),
        offset: query.offset.unwrap_or(0),
    };

    let tasks = state.lifecycle.store().list(owner.0, filter).await?;
    Ok(Json(tasks))
}

/// Get one task, owner-scoped.
async fn get_task(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(task_id): Path<TaskId>,
) -> Result<Json<Task>, ApiError> {
    let task = state
        .lifecycle
        .store()
        .get(task_id, owner.0)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(task))
}

/// Cancel a pending or queued task.
async fn cancel_task(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(task_id): Path<TaskId>,
) -> Result<Json<Task>, ApiError> {
    let task = state.lifecycle.cancel(task_id, owner.0).await?;
    Ok(Json(task))
}

/// Per-status task counts for the owner.
async fn get_stats(
    State(state): State<Arc<AppState>>,
    owner: Owner,
) -> Result<Json<taskhub_store::TaskStats>, ApiError> {
    let stats = state.lifecycle.store().stats(owner.0).await?;
    Ok(Json(stats))
}

/// Worker reports. These stand in for the external claimant processes and
/// are keyed by the transport message identifier; duplicates are no-ops.
async fn report_claimed(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClaimedReport>,
) -> Result<Json<ReportResponse>, ApiError> {
    let task = state
        .lifecycle
        .mark_claimed(&req.message_id, &req.worker_id)
        .await?;
    Ok(Json(ReportResponse {
        applied: task.is_some(),
        task,
    }))
}

async fn report_completed(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompletedReport>,
) -> Result<Json<ReportResponse>, ApiError> {
    let task = state
        .lifecycle
        .mark_completed(&req.message_id, req.result)
        .await?;
    Ok(Json(ReportResponse {
        applied: task.is_some(),
        task,
    }))
}

async fn report_failed(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FailedReport>,
) -> Result<Json<ReportResponse>, ApiError> {
    let task = state
        .lifecycle
        .mark_failed(&req.message_id, &req.error)
        .await?;
    Ok(Json(ReportResponse {
        applied: task.is_some(),
        task,
    }))
}

/// Liveness: store ping plus a lightweight queue metadata query.
async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    if state.lifecycle.store().ping().await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "store unreachable"})),
        )
            .into_response();
    }
    if state.lifecycle.queue().health_check().await.is_err() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "queue unreachable"})),
        )
            .into_response();
    }
    Json(serde_json::json!({"status": "ok"})).into_response()
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// API error surface.
///
/// Invalid transitions and not-found/not-owned cases are client errors;
/// transport/store outages are transient server errors, safe to retry.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    NotFound,
    Conflict(String),
    Unavailable(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidPriority(_) | Error::MalformedMessage(_) => {
                ApiError::BadRequest(err.to_string())
            }
            Error::NotFound => ApiError::NotFound,
            Error::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            Error::TransportUnavailable(_) | Error::StoreUnavailable(_) => {
                ApiError::Unavailable(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "task not found".to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };
        let body = Json(serde_json::json!({ "error": message }));
        (status, body).into_response()
    }
}
