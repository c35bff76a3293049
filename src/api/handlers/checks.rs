//! Check listing and dynamic registration

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use crate::api::envelope::{ApiErrorResponse, ApiResponse};
use crate::checks::{CheckInfo, RegistryError};
use crate::config::CheckConfig;
use crate::engine::EngineError;
use crate::status::CheckStatus;

use super::ApiState;

/// Check definition plus its live state
#[derive(Debug, Serialize)]
pub struct CheckView {
    #[serde(flatten)]
    pub info: CheckInfo,
    pub status: Option<CheckStatus>,
}

fn view(state: &ApiState, info: CheckInfo) -> CheckView {
    let status = state
        .engine
        .tracker()
        .get(&info.name)
        .map(|fs| CheckStatus::from(&fs));
    CheckView { info, status }
}

/// GET /api/v1/checks
pub async fn list_checks(State(state): State<ApiState>) -> Response {
    let views: Vec<CheckView> = state
        .engine
        .checks()
        .into_iter()
        .map(|info| view(&state, info))
        .collect();
    ApiResponse::ok(views)
}

/// GET /api/v1/checks/:name
pub async fn get_check(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.engine.check(&name) {
        Some(info) => ApiResponse::ok(view(&state, info)),
        None => ApiErrorResponse::not_found(format!("No check named '{}'", name)),
    }
}

/// POST /api/v1/checks - register a check while the engine runs
pub async fn create_check(
    State(state): State<ApiState>,
    payload: Result<Json<CheckConfig>, JsonRejection>,
) -> Response {
    let Json(config) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected check registration body");
            return ApiErrorResponse::bad_request(rejection.body_text());
        }
    };

    match state.engine.register_check_config(&config) {
        Ok(info) => {
            info!(check = %info.name, "Check registered via API");
            ApiResponse::created(view(&state, info))
        }
        Err(EngineError::Registry(RegistryError::Duplicate(name))) => {
            ApiErrorResponse::conflict(format!("check '{}' is already registered", name))
        }
        Err(e) => ApiErrorResponse::bad_request(e.to_string()),
    }
}
