//! Alerts and recovery audit endpoints

use axum::extract::{Query, State};
use axum::response::Response;

use crate::api::envelope::ApiResponse;

use super::{ApiState, LimitQuery};

/// GET /api/v1/alerts - open alerts, oldest first
pub async fn list_alerts(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(state.engine.active_alerts())
}

/// GET /api/v1/alerts/history?limit=50
pub async fn alert_history(State(state): State<ApiState>, Query(q): Query<LimitQuery>) -> Response {
    ApiResponse::ok(state.engine.alert_history(q.resolve()))
}

/// GET /api/v1/recovery/attempts?limit=50
pub async fn recovery_attempts(
    State(state): State<ApiState>,
    Query(q): Query<LimitQuery>,
) -> Response {
    ApiResponse::ok(state.engine.recovery_attempts(q.resolve()))
}
