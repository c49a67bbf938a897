//! Sandbox mode status and recovery.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use spendguard_store::SyncMode;
use tracing::info;

use crate::auth::CurrentUser;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncStatus {
    #[serde(flatten)]
    pub mode: SyncMode,
    /// Cached records not yet matching the store.
    pub unsynced: usize,
    /// Last store version the cache reconciled against.
    pub version: u64,
}

async fn status(state: &AppState) -> SyncStatus {
    let cache = state.cache.read().await;
    SyncStatus {
        mode: cache.mode().clone(),
        unsynced: cache.unsynced_count(),
        version: cache.version(),
    }
}

pub async fn get_sync(State(state): State<AppState>, CurrentUser(_): CurrentUser) -> Json<SyncStatus> {
    Json(status(&state).await)
}

/// Leave sandbox mode. Local-only changes stay in the cache and are not replayed.
pub async fn go_live(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Json<SyncStatus> {
    state.review_desk.go_live().await;
    info!(user = %user.id, "sync returned to live mode");
    Json(status(&state).await)
}
