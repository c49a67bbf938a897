//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use spendguard_core::SpendGuardError;
use thiserror::Error;

/// Errors returned by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or unknown `x-user-id`.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Receipt analysis failed; the intake session can be retried.
    #[error("{message}")]
    AnalysisFailed {
        session_id: uuid::Uuid,
        message: String,
    },

    #[error(transparent)]
    Domain(#[from] SpendGuardError),
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<uuid::Uuid>,
    /// Set when repeating the request later may succeed.
    pub retryable: bool,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::AnalysisFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Domain(e) => match e {
                SpendGuardError::Validation(_) => StatusCode::BAD_REQUEST,
                SpendGuardError::Forbidden { .. } => StatusCode::FORBIDDEN,
                SpendGuardError::NotFound { .. } => StatusCode::NOT_FOUND,
                SpendGuardError::InvalidTransition { .. } => StatusCode::CONFLICT,
                SpendGuardError::Provider(_)
                | SpendGuardError::Persistence(_)
                | SpendGuardError::ConnectionError(_) => StatusCode::SERVICE_UNAVAILABLE,
                SpendGuardError::SerializationError(_)
                | SpendGuardError::Config(_)
                | SpendGuardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::AnalysisFailed { .. } => "analysis_failed",
            ApiError::Domain(e) => match e {
                SpendGuardError::Validation(_) => "validation",
                SpendGuardError::Forbidden { .. } => "forbidden",
                SpendGuardError::NotFound { .. } => "not_found",
                SpendGuardError::InvalidTransition { .. } => "invalid_transition",
                SpendGuardError::Provider(_) => "provider_unavailable",
                SpendGuardError::Persistence(_) => "persistence_unavailable",
                SpendGuardError::ConnectionError(_) => "connection",
                SpendGuardError::SerializationError(_) => "serialization",
                SpendGuardError::Config(_) => "config",
                SpendGuardError::Internal(_) => "internal",
            },
        }
    }

    fn retryable(&self) -> bool {
        match self {
            ApiError::Unauthorized(_) => false,
            ApiError::AnalysisFailed { .. } => true,
            ApiError::Domain(e) => e.is_recoverable(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = %status, error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
            session_id: match &self {
                ApiError::AnalysisFailed { session_id, .. } => Some(*session_id),
                _ => None,
            },
            retryable: self.retryable(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (SpendGuardError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (
                SpendGuardError::Forbidden {
                    action: "validate".into(),
                    required: "reviewer".into(),
                },
                StatusCode::FORBIDDEN,
            ),
            (SpendGuardError::record_not_found("r1"), StatusCode::NOT_FOUND),
            (SpendGuardError::Provider("down".into()), StatusCode::SERVICE_UNAVAILABLE),
            (SpendGuardError::Internal("bug".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn test_provider_errors_are_retryable() {
        assert!(ApiError::from(SpendGuardError::Provider("down".into())).retryable());
        assert!(!ApiError::Unauthorized("who?".into()).retryable());
    }
}
