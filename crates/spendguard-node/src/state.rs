//! Application state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spendguard_core::{PurchaseRecord, RecordId, Result, SpendGuardError, User};
use spendguard_insight::InsightProvider;
use spendguard_store::{CachedRecord, RecordCache, RecordQuery, RecordStore};
use spendguard_workflow::{IntakeOrchestrator, ReviewDesk, SharedSession};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// How long an intake session may stay open by default.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Per-user display preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Preferences {
    #[serde(default)]
    pub dark_mode: bool,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Known users by id.
    pub users: Arc<HashMap<String, User>>,

    /// Preferences by user id.
    pub preferences: Arc<RwLock<HashMap<String, Preferences>>>,

    /// Local copy of the record collection.
    pub cache: Arc<RwLock<RecordCache>>,

    /// Open intake sessions.
    pub intakes: Arc<RwLock<HashMap<Uuid, SharedSession>>>,

    pub orchestrator: IntakeOrchestrator,

    pub review_desk: ReviewDesk,

    pub provider: Arc<dyn InsightProvider>,

    /// Source of truth for records.
    pub store: Arc<dyn RecordStore>,

    /// Open sessions older than this are swept.
    pub session_ttl: Duration,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        provider: Arc<dyn InsightProvider>,
        store: Arc<dyn RecordStore>,
        users: Vec<User>,
    ) -> Self {
        let cache = Arc::new(RwLock::new(RecordCache::new()));
        Self {
            users: Arc::new(users.into_iter().map(|u| (u.id.clone(), u)).collect()),
            preferences: Arc::new(RwLock::new(HashMap::new())),
            orchestrator: IntakeOrchestrator::new(provider.clone(), store.clone(), cache.clone()),
            review_desk: ReviewDesk::new(store.clone(), cache.clone()),
            cache,
            intakes: Arc::new(RwLock::new(HashMap::new())),
            provider,
            store,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    pub async fn preferences(&self, user_id: &str) -> Preferences {
        self.preferences
            .read()
            .await
            .get(user_id)
            .copied()
            .unwrap_or_default()
    }

    pub async fn set_preferences(&self, user_id: &str, preferences: Preferences) {
        self.preferences
            .write()
            .await
            .insert(user_id.to_string(), preferences);
    }

    pub async fn insert_session(&self, session: SharedSession) -> Uuid {
        self.sweep_sessions().await;
        let id = session.read().await.id;
        self.intakes.write().await.insert(id, session);
        id
    }

    /// An intake session owned by `user`. Other users' sessions look absent.
    pub async fn session(&self, id: Uuid, user: &User) -> Result<SharedSession> {
        let session = self
            .intakes
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| session_not_found(id))?;

        if session.read().await.submitter.user_id != user.id {
            return Err(session_not_found(id));
        }
        Ok(session)
    }

    pub async fn remove_session(&self, id: Uuid) -> Option<SharedSession> {
        self.intakes.write().await.remove(&id)
    }

    /// Drop closed sessions and open ones older than the session TTL.
    /// Returns how many were removed.
    pub async fn sweep_sessions(&self) -> usize {
        let sessions: Vec<(Uuid, SharedSession)> = self
            .intakes
            .read()
            .await
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect();

        let mut expired = Vec::new();
        for (id, session) in sessions {
            let session = session.read().await;
            if session.state().is_closed() || session.is_expired(self.session_ttl) {
                expired.push(id);
            }
        }
        if expired.is_empty() {
            return 0;
        }

        let mut intakes = self.intakes.write().await;
        for id in &expired {
            intakes.remove(id);
        }
        debug!(removed = expired.len(), open = intakes.len(), "swept intake sessions");
        expired.len()
    }

    /// Cached entries `user` may see, newest first.
    pub async fn visible_entries(&self, user: &User) -> Vec<CachedRecord> {
        self.cache.read().await.entries(&RecordQuery::visible_to(user))
    }

    pub async fn visible_records(&self, user: &User) -> Vec<PurchaseRecord> {
        self.cache.read().await.records(&RecordQuery::visible_to(user))
    }

    /// A cached record `user` may see.
    pub async fn record(&self, id: &RecordId, user: &User) -> Result<CachedRecord> {
        self.cache
            .read()
            .await
            .get(id)
            .filter(|e| e.record.is_visible_to(user))
            .cloned()
            .ok_or_else(|| SpendGuardError::record_not_found(id.as_str()))
    }
}

fn session_not_found(id: Uuid) -> SpendGuardError {
    SpendGuardError::NotFound {
        resource_type: "IntakeSession".to_string(),
        id: id.to_string(),
    }
}
