//! Receipt intake endpoints.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use spendguard_core::{ExtractionResult, ReceiptImage, Result, SpendGuardError, Submitter};
use spendguard_workflow::{IntakeView, SharedSession, SubmitMode, SubmitOutcome};
use tracing::info;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Response after a successful analysis.
#[derive(Debug, Serialize, Deserialize)]
pub struct IntakeResponse {
    pub session_id: Uuid,
    pub generation: u64,
    pub extraction: ExtractionResult,
}

/// Request to submit a staged receipt.
#[derive(Debug, Default, Deserialize)]
pub struct SubmitRequest {
    /// Submit even if possible duplicates were found.
    #[serde(default)]
    pub force: bool,
}

fn receipt_image(headers: &HeaderMap, body: Bytes) -> Result<ReceiptImage> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let mime_type = content_type.split(';').next().unwrap_or_default();
    ReceiptImage::new(body.to_vec(), mime_type)
}

async fn analyzed(
    session_id: Uuid,
    session: &SharedSession,
    result: Result<ExtractionResult>,
) -> ApiResult<Json<IntakeResponse>> {
    match result {
        Ok(extraction) => Ok(Json(IntakeResponse {
            session_id,
            generation: session.read().await.generation(),
            extraction,
        })),
        Err(SpendGuardError::Provider(message)) => Err(ApiError::AnalysisFailed {
            session_id,
            message: format!("Receipt analysis failed: {message}"),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Upload a receipt image and analyze it.
pub async fn start_intake(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<IntakeResponse>)> {
    let image = receipt_image(&headers, body)?;
    let session = state.orchestrator.open(Submitter::from(&user), image);
    let session_id = state.insert_session(session.clone()).await;

    let result = state.orchestrator.analyze(&session).await;
    let response = analyzed(session_id, &session, result).await?;
    Ok((StatusCode::CREATED, response))
}

/// Re-run analysis on the same image.
pub async fn retry_intake(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<IntakeResponse>> {
    let session = state.session(id, &user).await?;
    let result = state.orchestrator.analyze(&session).await;
    analyzed(id, &session, result).await
}

/// Replace the image and analyze again.
pub async fn retake_intake(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<IntakeResponse>> {
    let image = receipt_image(&headers, body)?;
    let session = state.session(id, &user).await?;
    let result = state.orchestrator.retake(&session, image).await;
    analyzed(id, &session, result).await
}

/// Current view of a session.
pub async fn get_intake(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<IntakeView>> {
    let session = state.session(id, &user).await?;
    let view = session.read().await.view();
    Ok(Json(view))
}

/// Discard a session.
pub async fn discard_intake(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let session = state.session(id, &user).await?;
    session.write().await.discard();
    state.remove_session(id).await;
    info!(session_id = %id, "intake session discarded");
    Ok(StatusCode::NO_CONTENT)
}

/// Submit a staged receipt. Possible duplicates answer 409 unless forced.
pub async fn submit_intake(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    body: Option<Json<SubmitRequest>>,
) -> ApiResult<Response> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let mode = if request.force {
        SubmitMode::Force
    } else {
        SubmitMode::Normal
    };

    let session = state.session(id, &user).await?;
    let outcome = state.orchestrator.submit(&session, mode).await?;

    let status = match &outcome {
        SubmitOutcome::NeedsConfirmation { .. } => StatusCode::CONFLICT,
        SubmitOutcome::Created { .. } => {
            state.remove_session(id).await;
            StatusCode::CREATED
        }
    };
    Ok((status, Json(outcome)).into_response())
}
