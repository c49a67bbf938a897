//! Reviewer actions against the cache and the store.

use std::sync::Arc;

use chrono::Utc;
use spendguard_core::review::plan_transition;
use spendguard_core::{RecordId, Result, ReviewAction, SpendGuardError, User};
use spendguard_store::{CachedRecord, RecordCache, RecordStore, SyncMode};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Applies review transitions with a two-phase optimistic update.
#[derive(Clone)]
pub struct ReviewDesk {
    store: Arc<dyn RecordStore>,
    cache: Arc<RwLock<RecordCache>>,
}

impl ReviewDesk {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<RwLock<RecordCache>>) -> Self {
        Self { store, cache }
    }

    /// Validate, resolve or reject a record.
    ///
    /// All checks run before the cache is touched. The change is applied to
    /// the cache first and confirmed or rolled back once the store answers;
    /// a persistence failure also switches the cache to sandbox mode.
    pub async fn act(&self, id: &RecordId, actor: &User, action: &ReviewAction) -> Result<CachedRecord> {
        let (update_id, patch) = {
            let mut cache = self.cache.write().await;
            let entry = cache
                .get(id)
                .filter(|e| e.record.is_visible_to(actor))
                .ok_or_else(|| SpendGuardError::record_not_found(id.as_str()))?;

            let patch = plan_transition(&entry.record, actor, action, Utc::now())?;

            if cache.is_sandbox() || id.is_local() {
                cache.apply_local(id, &patch)?;
                info!(record_id = %id, action = action.name(), "review applied locally");
                return current(&cache, id);
            }

            (cache.apply_tentative(id, &patch)?, patch)
        };

        match self.store.update_record(id, &patch).await {
            Ok(()) => {
                let mut cache = self.cache.write().await;
                cache.confirm(update_id);
                info!(record_id = %id, action = action.name(), reviewer = %actor.id, "review confirmed");
                current(&cache, id)
            }
            Err(e) => {
                let mut cache = self.cache.write().await;
                cache.roll_back(update_id);
                if matches!(e, SpendGuardError::Persistence(_)) {
                    cache.enter_sandbox(e.to_string());
                }
                warn!(record_id = %id, action = action.name(), error = %e, "review rolled back");
                Err(e)
            }
        }
    }

    pub async fn mode(&self) -> SyncMode {
        self.cache.read().await.mode().clone()
    }

    /// Leave sandbox mode. Local-only changes are not replayed.
    pub async fn go_live(&self) {
        self.cache.write().await.go_live();
    }
}

fn current(cache: &RecordCache, id: &RecordId) -> Result<CachedRecord> {
    cache
        .get(id)
        .cloned()
        .ok_or_else(|| SpendGuardError::record_not_found(id.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use spendguard_core::{
        ExtractionResult, NewRecord, PurchaseRecord, RecordPatch, RecordStatus, RejectionReason,
        Role, Submitter,
    };
    use spendguard_store::{
        InMemoryRecordStore, RecordQuery, SnapshotStream, SyncState,
    };

    /// Counts update calls on top of the in-memory store.
    struct CountingStore {
        inner: InMemoryRecordStore,
        updates: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for CountingStore {
        async fn create_record(&self, record: NewRecord) -> Result<PurchaseRecord> {
            self.inner.create_record(record).await
        }

        async fn update_record(&self, id: &RecordId, patch: &RecordPatch) -> Result<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.inner.update_record(id, patch).await
        }

        async fn get_record(&self, id: &RecordId) -> Result<Option<PurchaseRecord>> {
            self.inner.get_record(id).await
        }

        async fn list_records(&self, query: &RecordQuery) -> Result<Vec<PurchaseRecord>> {
            self.inner.list_records(query).await
        }

        async fn subscribe(&self, query: RecordQuery) -> Result<SnapshotStream> {
            self.inner.subscribe(query).await
        }

        async fn upload_binary(&self, bytes: Vec<u8>, path: &str) -> Result<String> {
            self.inner.upload_binary(bytes, path).await
        }
    }

    fn user(id: &str, role: Role) -> User {
        User {
            id: id.into(),
            display_name: id.to_uppercase(),
            organization: "acme".into(),
            role,
        }
    }

    struct Desk {
        desk: ReviewDesk,
        store: Arc<CountingStore>,
        cache: Arc<RwLock<RecordCache>>,
        id: RecordId,
    }

    async fn desk_with_record() -> Desk {
        let store = Arc::new(CountingStore {
            inner: InMemoryRecordStore::new(),
            updates: AtomicUsize::new(0),
        });
        let extraction = ExtractionResult {
            vendor: "Staples".into(),
            amount: 45.0,
            date: "2024-01-10".into(),
            description: "Paper".into(),
            category: "Supplies".into(),
            confidence: 90,
            suggested_gl_code: "6100".into(),
            market_price_estimate: None,
            is_subscription: None,
            flags: Vec::new(),
        };
        let submitter = Submitter {
            user_id: "sub".into(),
            display_name: "SUB".into(),
            organization: "acme".into(),
        };
        let record = store
            .create_record(NewRecord::from_extraction(extraction, submitter))
            .await
            .unwrap();

        let cache = Arc::new(RwLock::new(RecordCache::new()));
        cache.write().await.insert_confirmed(record.clone());

        Desk {
            desk: ReviewDesk::new(store.clone(), cache.clone()),
            store,
            cache,
            id: record.id,
        }
    }

    fn reject(reasons: Vec<RejectionReason>) -> ReviewAction {
        ReviewAction::Reject {
            reasons,
            notes: Some("  Personal purchase ".into()),
        }
    }

    #[tokio::test]
    async fn test_validate_is_confirmed_and_persisted() {
        let d = desk_with_record().await;

        let entry = d
            .desk
            .act(&d.id, &user("rev", Role::Reviewer), &ReviewAction::Validate)
            .await
            .unwrap();

        assert_eq!(entry.sync, SyncState::Confirmed);
        assert_eq!(entry.record.status(), RecordStatus::Validated);
        assert!(entry.record.rejection().is_none());
        let stored = d.store.get_record(&d.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), RecordStatus::Validated);
    }

    #[tokio::test]
    async fn test_reject_sets_metadata() {
        let d = desk_with_record().await;

        let entry = d
            .desk
            .act(
                &d.id,
                &user("rev", Role::Reviewer),
                &reject(vec![RejectionReason::Waste, RejectionReason::Waste]),
            )
            .await
            .unwrap();

        let rejection = entry.record.rejection().unwrap();
        assert_eq!(rejection.reasons, vec![RejectionReason::Waste]);
        assert_eq!(rejection.notes.as_deref(), Some("Personal purchase"));
        assert_eq!(rejection.rejected_by, "REV");
    }

    #[tokio::test]
    async fn test_empty_reject_makes_no_calls() {
        let d = desk_with_record().await;

        let err = d
            .desk
            .act(&d.id, &user("rev", Role::Reviewer), &reject(Vec::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, SpendGuardError::Validation(_)));
        assert_eq!(d.store.updates.load(Ordering::SeqCst), 0);
        let cache = d.cache.read().await;
        assert_eq!(cache.get(&d.id).unwrap().record.status(), RecordStatus::Pending);
    }

    #[tokio::test]
    async fn test_non_reviewer_is_forbidden() {
        let d = desk_with_record().await;

        let err = d
            .desk
            .act(&d.id, &user("sub", Role::Submitter), &ReviewAction::Validate)
            .await
            .unwrap_err();

        assert!(matches!(err, SpendGuardError::Forbidden { .. }));
        assert_eq!(d.store.updates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_terminal_record_cannot_move() {
        let d = desk_with_record().await;
        let reviewer = user("rev", Role::Reviewer);
        d.desk.act(&d.id, &reviewer, &ReviewAction::Resolve).await.unwrap();

        let err = d
            .desk
            .act(&d.id, &reviewer, &ReviewAction::Validate)
            .await
            .unwrap_err();
        assert!(matches!(err, SpendGuardError::InvalidTransition { .. }));
        assert_eq!(d.store.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_organization_sees_not_found() {
        let d = desk_with_record().await;
        let mut outsider = user("rev", Role::Reviewer);
        outsider.organization = "globex".into();

        let err = d
            .desk
            .act(&d.id, &outsider, &ReviewAction::Validate)
            .await
            .unwrap_err();
        assert!(matches!(err, SpendGuardError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_persistence_failure_rolls_back_and_enters_sandbox() {
        let d = desk_with_record().await;
        let reviewer = user("rev", Role::Reviewer);
        d.store.inner.set_offline(true);

        let err = d
            .desk
            .act(&d.id, &reviewer, &ReviewAction::Validate)
            .await
            .unwrap_err();
        assert!(matches!(err, SpendGuardError::Persistence(_)));

        {
            let cache = d.cache.read().await;
            let entry = cache.get(&d.id).unwrap();
            assert_eq!(entry.record.status(), RecordStatus::Pending);
            assert_eq!(entry.sync, SyncState::Confirmed);
            assert!(cache.is_sandbox());
        }

        // Sandbox: applied locally, no further store calls.
        let entry = d
            .desk
            .act(&d.id, &reviewer, &ReviewAction::Validate)
            .await
            .unwrap();
        assert_eq!(entry.sync, SyncState::LocalOnly);
        assert_eq!(entry.record.status(), RecordStatus::Validated);
        assert_eq!(d.store.updates.load(Ordering::SeqCst), 1);

        d.desk.go_live().await;
        assert_eq!(d.desk.mode().await, SyncMode::Live);
    }
}
