//! Liveness, status snapshot and predictions

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::envelope::ApiResponse;
use crate::status::StatusSnapshot;

use super::ApiState;

/// Liveness body for `GET /health`
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
    /// Whether the scheduler is running
    pub running: bool,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// GET /health - always 200 while the process is up
pub async fn liveness(State(state): State<ApiState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok",
        running: state.engine.is_running(),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

/// GET /api/v1/status - raw snapshot, consumed by `vigil status`
pub async fn get_status(State(state): State<ApiState>) -> Json<StatusSnapshot> {
    Json(state.engine.snapshot())
}

/// GET /api/v1/predictions
pub async fn get_predictions(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.engine.predictions())
}
