//! Dashboard aggregates and free-form spend insights.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use spendguard_core::{DashboardSummary, SpendGuardError};
use tracing::debug;

use crate::auth::CurrentUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InsightRequest {
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InsightResponse {
    pub answer: String,
}

/// Aggregates over the records the caller may see.
pub async fn get_dashboard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Json<DashboardSummary> {
    let records = state.visible_records(&user).await;
    Json(DashboardSummary::from_records(&records))
}

/// Answer a question about the caller's visible spend.
pub async fn ask_insight(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<InsightRequest>,
) -> ApiResult<Json<InsightResponse>> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err(SpendGuardError::Validation("Query must not be empty".to_string()).into());
    }

    let records = state.visible_records(&user).await;
    let summary = DashboardSummary::from_records(&records).to_data_summary();
    debug!(user = %user.id, records = records.len(), "generating insight");

    let answer = state.provider.generate_insight(query, &summary).await?;
    Ok(Json(InsightResponse { answer }))
}
