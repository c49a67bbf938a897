//! Current user and preferences.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use spendguard_core::User;

use crate::auth::CurrentUser;
use crate::state::{AppState, Preferences};

#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub user: User,
    pub preferences: Preferences,
}

pub async fn get_me(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Json<MeResponse> {
    let preferences = state.preferences(&user.id).await;
    Json(MeResponse { user, preferences })
}

pub async fn update_preferences(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(preferences): Json<Preferences>,
) -> Json<Preferences> {
    state.set_preferences(&user.id, preferences).await;
    Json(preferences)
}
