//! Request identity.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use spendguard_core::User;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the caller's user id.
pub const USER_HEADER: &str = "x-user-id";

/// The user making the request, resolved against the user directory.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_HEADER} header")))?;

        state
            .user(id)
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| ApiError::Unauthorized(format!("unknown user '{id}'")))
    }
}
