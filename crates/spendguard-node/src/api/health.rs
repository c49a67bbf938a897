//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;
use spendguard_store::SyncMode;

use crate::state::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub provider: String,
    pub sandbox: bool,
}

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let sandbox = matches!(state.review_desk.mode().await, SyncMode::Sandbox { .. });
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: state.provider.name().to_string(),
        sandbox,
    })
}
