use crate::errors::{AppError, AppResult};
use crate::middleware::{constant_time_eq, extract_bearer_token};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Request, State},
};
use imageflow_core::config::ClientConfig;
use serde_json::{Value, json};
use tracing::info;

/// Standalone Bearer validation for clients probing their stored key.
/// Outside the auth middleware; fails closed with the bare error envelope.
pub async fn validate_api_key(
    State(state): State<AppState>,
    request: Request,
) -> AppResult<Json<Value>> {
    let token = extract_bearer_token(&request)
        .ok_or_else(|| AppError::unauthorized("missing or malformed Authorization header"))?;
    if !constant_time_eq(token.as_bytes(), state.config.api_key.as_bytes()) {
        return Err(AppError::unauthorized("invalid API key"));
    }
    Ok(Json(json!({ "valid": true })))
}

/// Sorted distinct tag values.
pub async fn list_tags(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    Ok(Json(state.index.all_tags().await?))
}

/// Curated client configuration; never secrets.
pub async fn client_config(State(state): State<AppState>) -> Json<ClientConfig> {
    Json(state.config.client_view())
}

/// Manual out-of-band sweep trigger.
pub async fn trigger_cleanup(State(state): State<AppState>) -> Json<Value> {
    info!("manual cleanup triggered");
    let report = state.sweeper.run_once().await;
    Json(json!({
        "success": true,
        "removed": report.removed,
        "errors": report.errors,
    }))
}
