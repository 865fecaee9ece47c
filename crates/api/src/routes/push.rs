//! Ingestion route.
//!
//! The body is the provider's raw payload. It is validated by the target
//! service and appended to that service's queue; delivery happens later on
//! the service's workers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use pushgate_common::error::AppError;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/push/{service}", post(push))
}

/// POST /api/push/{service}
async fn push(
    State(state): State<AppState>,
    Path(service): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let pump = state
        .registry
        .get(&service)
        .await
        .ok_or_else(|| AppError::UnknownService(service.clone()))?;

    if let Err(e) = pump.enqueue(body.to_vec()).await {
        match &e {
            AppError::Validation(reason) => {
                tracing::debug!(service = %service, reason = %reason, "Rejected payload")
            }
            _ => tracing::error!(service = %service, error = %e, "Enqueue failed"),
        }
        return Err(e);
    }

    Ok(Json(json!({ "status": "queued" })))
}
