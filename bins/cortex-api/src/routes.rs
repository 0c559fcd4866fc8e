// Route definitions for the Cortex API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{handlers, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/engine/execute", post(handlers::submit_code))
        .route("/engine/result/:task_id", get(handlers::get_result))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::export_metrics))
}
