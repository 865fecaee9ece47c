//! Delivery feedback: invalid-token reports and per-service counters.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/feedback", post(drain_feedback))
        .route("/api/stats", get(stats))
}

/// POST /api/feedback
///
/// Hands out every buffered invalid-token report and clears the buffer.
async fn drain_feedback(State(state): State<AppState>) -> Json<serde_json::Value> {
    let feedback = state.feedback.drain_invalid_tokens();
    tracing::debug!(count = feedback.len(), "Feedback drained");
    Json(json!({ "feedback": feedback }))
}

/// GET /api/stats
async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let counters = state.feedback.stats();
    let mut services = serde_json::Map::new();

    for pump in state.registry.all().await {
        let id = pump.id();
        let queued = match pump.queue().len().await {
            Ok(len) => Some(len),
            Err(e) => {
                tracing::warn!(service = id, error = %e, "Reading queue length failed");
                None
            }
        };
        let pushes = counters.get(id).cloned().unwrap_or_default();
        services.insert(
            id.to_string(),
            json!({
                "display_name": pump.display_name(),
                "workers": pump.worker_count(),
                "queued": queued,
                "pushed": pushes.pushed,
                "failed": pushes.failed,
                "total_latency_ms": pushes.total_latency_ms,
            }),
        );
    }

    Json(json!({
        "services": services,
        "pending_feedback": state.feedback.pending_invalid_tokens(),
    }))
}
