// HTTP route handlers for the Cortex API

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use cortex_common::types::CodeSubmission;
use cortex_common::EngineError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{metrics, AppState};

pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: Uuid,
}

/// Failure surfaced to the caller as `{ "error": ... }`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Engine(e) => {
                let status = match &e {
                    EngineError::ExerciseNotFound(_)
                    | EngineError::ResultNotAvailable(_)
                    | EngineError::SubmissionNotFound(_) => StatusCode::NOT_FOUND,
                    e if e.is_validation() => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!(error = %e, "Request failed");
                }
                (status, e.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

fn user_id(headers: &HeaderMap) -> Result<i64, ApiError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing or invalid X-User-Id header".to_string()))
}

/// POST /engine/execute - Validate and queue a submission
pub async fn submit_code(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CodeSubmission>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let user_id = user_id(&headers).map_err(|e| {
        metrics::record_submission_rejected("missing_user");
        e
    })?;
    let language = payload.language.trim().to_lowercase();

    match state.orchestrator.submit(payload, user_id).await {
        Ok(task_id) => {
            metrics::record_submission_accepted(&language);
            info!(task_id = %task_id, user_id, language = %language, "Submission accepted");
            Ok((StatusCode::ACCEPTED, Json(SubmitResponse { task_id })))
        }
        Err(e) => {
            if e.is_validation() {
                metrics::record_submission_rejected(e.reason());
                warn!(user_id, reason = e.reason(), error = %e, "Submission rejected");
            }
            Err(e.into())
        }
    }
}

/// GET /engine/result/{task_id} - Non-blocking result lookup
pub async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<cortex_common::types::ExecutionResult>, ApiError> {
    let task_id = Uuid::parse_str(&task_id)
        .map_err(|_| ApiError::BadRequest("Invalid task ID format".to_string()))?;

    match state.orchestrator.get_result(task_id).await {
        Ok(result) => {
            metrics::record_result_poll("ready");
            info!(task_id = %task_id, success = result.success, "Result retrieved");
            Ok(Json(result))
        }
        Err(e @ EngineError::ResultNotAvailable(_)) => {
            metrics::record_result_poll("pending");
            Err(e.into())
        }
        Err(e) => {
            metrics::record_result_poll("error");
            Err(e.into())
        }
    }
}

/// GET /health - Liveness check
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus exposition
pub async fn export_metrics(State(state): State<Arc<AppState>>) -> Response {
    if let Some(queue) = &state.queue_probe {
        match queue.depth().await {
            Ok(depth) => metrics::set_queue_depth(depth),
            Err(e) => warn!(error = %e, "Failed to read queue depth"),
        }
    }

    match metrics::render_metrics() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
