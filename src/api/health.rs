use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let report = state.health.check_health().await;
    let stats = state.queue.statistics().await.map_err(|e| {
        tracing::error!("Queue statistics failed during health check: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(json!({
        "status": report.overall,
        "probes": report.probes,
        "queue": {
            "queued": stats.queued,
            "scheduled": stats.scheduled,
            "processing": stats.processing,
            "oldest_queued_age_seconds": stats.oldest_queued_age_seconds,
        },
        "checked_at": report.checked_at,
    })))
}
