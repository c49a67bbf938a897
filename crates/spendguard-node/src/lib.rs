//! # SpendGuard Node
//!
//! HTTP and WebSocket API over the intake workflow and review desk.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use spendguard_store::InMemoryRecordStore;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod state;
pub mod sync;

use config::NodeConfig;
use state::AppState;
use sync::SyncEngine;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Build application state from configuration.
pub async fn build_state(config: &NodeConfig) -> anyhow::Result<AppState> {
    let provider = config.provider.build()?;
    let store = Arc::new(InMemoryRecordStore::new());
    let state = AppState::new(provider, store, config.users.clone())
        .with_session_ttl(config.intake_session_ttl());

    if config.sandbox_on_start {
        state.cache.write().await.enter_sandbox("started in sandbox mode");
    }
    Ok(state)
}

/// Run the SpendGuard node server.
pub async fn run_server(config: NodeConfig) -> anyhow::Result<()> {
    info!("SpendGuard node starting");

    let addr: SocketAddr = config.bind_addr.parse()?;
    let state = build_state(&config).await?;
    info!(provider = state.provider.name(), users = state.users.len(), "state ready");

    let sync = Arc::new(SyncEngine::new(state.clone()));
    tokio::spawn(sync.run());

    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            ticks.tick().await;
            sweeper.sweep_sessions().await;
        }
    });

    let app = create_router(state);

    info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(api::health::health_check))
        // Current user
        .route("/api/v1/me", get(api::me::get_me))
        .route("/api/v1/me/preferences", put(api::me::update_preferences))
        // Intake
        .route("/api/v1/intake", post(api::intake::start_intake))
        .route("/api/v1/intake/:id", get(api::intake::get_intake))
        .route("/api/v1/intake/:id", delete(api::intake::discard_intake))
        .route("/api/v1/intake/:id/retry", post(api::intake::retry_intake))
        .route("/api/v1/intake/:id/retake", post(api::intake::retake_intake))
        .route("/api/v1/intake/:id/submit", post(api::intake::submit_intake))
        // Records and review
        .route("/api/v1/records", get(api::records::list_records))
        .route("/api/v1/records/:id", get(api::records::get_record))
        .route("/api/v1/records/:id/validate", post(api::records::validate_record))
        .route("/api/v1/records/:id/resolve", post(api::records::resolve_record))
        .route("/api/v1/records/:id/reject", post(api::records::reject_record))
        .route(
            "/api/v1/records/:id/rejection-email",
            post(api::records::draft_rejection_email),
        )
        // Dashboard
        .route("/api/v1/dashboard", get(api::dashboard::get_dashboard))
        .route("/api/v1/insights", post(api::dashboard::ask_insight))
        // Sync mode
        .route("/api/v1/sync", get(api::sync::get_sync))
        .route("/api/v1/sync/live", post(api::sync::go_live))
        // WebSocket endpoints
        .route("/ws/records", get(api::ws::records_stream))
        .route("/ws/intake/:id", get(api::ws::intake_stream))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
