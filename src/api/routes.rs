//! API route definitions
//!
//! - /api/v1/status - full status snapshot
//! - /api/v1/checks - registered checks, dynamic registration
//! - /api/v1/alerts - active alerts and alert history
//! - /api/v1/recovery/attempts - recovery audit trail
//! - /api/v1/predictions - current trend risks

use axum::{routing::get, Router};

use super::handlers::{self, ApiState};

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handlers::get_status))
        .route("/checks", get(handlers::list_checks).post(handlers::create_check))
        .route("/checks/:name", get(handlers::get_check))
        .route("/alerts", get(handlers::list_alerts))
        .route("/alerts/history", get(handlers::alert_history))
        .route("/recovery/attempts", get(handlers::recovery_attempts))
        .route("/predictions", get(handlers::get_predictions))
        .with_state(state)
}

/// Liveness endpoint at root level
pub fn root_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::liveness))
        .with_state(state)
}
