use axum::Json;
use axum::extract::State;
use folio_core::CoreError;
use serde_json::{Value, json};

use crate::infra::app_state::AppState;

/// Service health plus worker reachability and queue occupancy.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let worker_status = match state.worker.stats().await {
        Ok(_) => "healthy",
        Err(CoreError::WorkerRequest(err)) if err.is_status() => "unhealthy",
        Err(_) => "unreachable",
    };

    Json(json!({
        "status": "healthy",
        "comfyui": worker_status,
        "queue": state.queue.status(),
    }))
}
