//! SpendGuard client implementation.

use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use spendguard_core::{
    DashboardSummary, ExtractionResult, RecordStatus, RejectionReason, User,
};
use spendguard_store::{CachedRecord, SyncMode};
use spendguard_workflow::{IntakeView, SubmitOutcome};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::stream::{IntakeStream, RecordStream};

/// Header carrying the caller's user id.
pub const USER_HEADER: &str = "x-user-id";

/// Client for interacting with a SpendGuard node as one user.
#[derive(Clone)]
pub struct SpendGuardClient {
    /// Base URL of the node.
    base_url: String,

    user_id: String,

    http_client: reqwest::Client,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub provider: String,
    pub sandbox: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Preferences {
    #[serde(default)]
    pub dark_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeResponse {
    pub user: User,
    pub preferences: Preferences,
}

/// Result of a successful receipt analysis.
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeResponse {
    pub session_id: Uuid,
    pub generation: u64,
    pub extraction: ExtractionResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectionEmail {
    pub recipient: String,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncStatus {
    #[serde(flatten)]
    pub mode: SyncMode,
    pub unsynced: usize,
    pub version: u64,
}

#[derive(Debug, Deserialize)]
struct InsightResponse {
    answer: String,
}

impl SpendGuardClient {
    /// Create a client without contacting the node.
    pub fn new(url: &str, user_id: impl Into<String>) -> Self {
        Self {
            base_url: url.trim_end_matches('/').to_string(),
            user_id: user_id.into(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Connect to a node, verifying it answers its health check.
    pub async fn connect(url: &str, user_id: impl Into<String>) -> ClientResult<Self> {
        let client = Self::new(url, user_id);
        let health = client.health().await?;
        debug!(version = %health.version, provider = %health.provider, "connected to node");
        Ok(client)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}{}", self.base_url, path))
            .header(USER_HEADER, &self.user_id)
    }

    async fn send(builder: RequestBuilder) -> ClientResult<Response> {
        let response = builder.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        Err(ClientError::from_body(status, &text))
    }

    async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> ClientResult<T> {
        let response = Self::send(builder).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    fn ws_url(&self, path: &str) -> String {
        let base = self
            .base_url
            .replacen("http://", "ws://", 1)
            .replacen("https://", "wss://", 1);
        format!("{base}{path}")
    }

    pub async fn health(&self) -> ClientResult<HealthResponse> {
        Self::send_json(self.http_client.get(format!("{}/health", self.base_url))).await
    }

    pub async fn me(&self) -> ClientResult<MeResponse> {
        Self::send_json(self.request(Method::GET, "/api/v1/me")).await
    }

    pub async fn set_preferences(&self, preferences: Preferences) -> ClientResult<Preferences> {
        Self::send_json(
            self.request(Method::PUT, "/api/v1/me/preferences")
                .json(&preferences),
        )
        .await
    }

    /// Upload a receipt image and wait for its analysis.
    ///
    /// A failed analysis returns an API error whose `session_id` can be
    /// passed to [`Self::retry_intake`].
    pub async fn upload_receipt(&self, bytes: Vec<u8>, mime_type: &str) -> ClientResult<IntakeResponse> {
        Self::send_json(
            self.request(Method::POST, "/api/v1/intake")
                .header(header::CONTENT_TYPE, mime_type)
                .body(bytes),
        )
        .await
    }

    pub async fn retry_intake(&self, session_id: Uuid) -> ClientResult<IntakeResponse> {
        let path = format!("/api/v1/intake/{session_id}/retry");
        Self::send_json(self.request(Method::POST, &path)).await
    }

    /// Replace a session's image and analyze it again.
    pub async fn retake(&self, session_id: Uuid, bytes: Vec<u8>, mime_type: &str) -> ClientResult<IntakeResponse> {
        let path = format!("/api/v1/intake/{session_id}/retake");
        Self::send_json(
            self.request(Method::POST, &path)
                .header(header::CONTENT_TYPE, mime_type)
                .body(bytes),
        )
        .await
    }

    pub async fn intake(&self, session_id: Uuid) -> ClientResult<IntakeView> {
        let path = format!("/api/v1/intake/{session_id}");
        Self::send_json(self.request(Method::GET, &path)).await
    }

    pub async fn discard(&self, session_id: Uuid) -> ClientResult<()> {
        let path = format!("/api/v1/intake/{session_id}");
        Self::send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    /// Submit a staged receipt.
    ///
    /// Possible duplicates come back as [`SubmitOutcome::NeedsConfirmation`];
    /// submit again with `force` to create the record anyway.
    pub async fn submit(&self, session_id: Uuid, force: bool) -> ClientResult<SubmitOutcome> {
        let path = format!("/api/v1/intake/{session_id}/submit");
        let response = self
            .request(Method::POST, &path)
            .json(&json!({ "force": force }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            return response
                .json()
                .await
                .map_err(|e| ClientError::Decode(e.to_string()));
        }
        let text = response.text().await.unwrap_or_default();
        Err(ClientError::from_body(status.as_u16(), &text))
    }

    /// Records visible to this user, newest first. An empty filter lists all.
    pub async fn records(&self, statuses: &[RecordStatus]) -> ClientResult<Vec<CachedRecord>> {
        let mut builder = self.request(Method::GET, "/api/v1/records");
        if !statuses.is_empty() {
            let filter = statuses
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(",");
            builder = builder.query(&[("status", filter)]);
        }
        Self::send_json(builder).await
    }

    pub async fn record(&self, id: &str) -> ClientResult<CachedRecord> {
        let path = format!("/api/v1/records/{id}");
        Self::send_json(self.request(Method::GET, &path)).await
    }

    pub async fn validate(&self, id: &str) -> ClientResult<CachedRecord> {
        let path = format!("/api/v1/records/{id}/validate");
        Self::send_json(self.request(Method::POST, &path)).await
    }

    pub async fn resolve(&self, id: &str) -> ClientResult<CachedRecord> {
        let path = format!("/api/v1/records/{id}/resolve");
        Self::send_json(self.request(Method::POST, &path)).await
    }

    pub async fn reject(
        &self,
        id: &str,
        reasons: &[RejectionReason],
        notes: Option<&str>,
    ) -> ClientResult<CachedRecord> {
        let path = format!("/api/v1/records/{id}/reject");
        Self::send_json(
            self.request(Method::POST, &path)
                .json(&json!({ "reasons": reasons, "notes": notes })),
        )
        .await
    }

    /// Draft an email explaining a rejection. The recipient defaults to the submitter.
    pub async fn rejection_email(&self, id: &str, recipient: Option<&str>) -> ClientResult<RejectionEmail> {
        let path = format!("/api/v1/records/{id}/rejection-email");
        Self::send_json(
            self.request(Method::POST, &path)
                .json(&json!({ "recipient": recipient })),
        )
        .await
    }

    pub async fn dashboard(&self) -> ClientResult<DashboardSummary> {
        Self::send_json(self.request(Method::GET, "/api/v1/dashboard")).await
    }

    /// Ask a free-form question about the visible spend.
    pub async fn ask(&self, query: &str) -> ClientResult<String> {
        let response: InsightResponse = Self::send_json(
            self.request(Method::POST, "/api/v1/insights")
                .json(&json!({ "query": query })),
        )
        .await?;
        Ok(response.answer)
    }

    pub async fn sync_status(&self) -> ClientResult<SyncStatus> {
        Self::send_json(self.request(Method::GET, "/api/v1/sync")).await
    }

    /// Leave sandbox mode.
    pub async fn go_live(&self) -> ClientResult<SyncStatus> {
        Self::send_json(self.request(Method::POST, "/api/v1/sync/live")).await
    }

    /// Live snapshots of the records this user may see.
    pub async fn watch_records(&self) -> ClientResult<RecordStream> {
        RecordStream::connect(&self.ws_url("/ws/records"), &self.user_id).await
    }

    /// Live progress of one intake session.
    pub async fn watch_intake(&self, session_id: Uuid) -> ClientResult<IntakeStream> {
        let url = self.ws_url(&format!("/ws/intake/{session_id}"));
        IntakeStream::connect(&url, &self.user_id, session_id).await
    }
}
