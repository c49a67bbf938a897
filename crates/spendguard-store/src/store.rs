//! Record store implementations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use spendguard_core::{
    NewRecord, PurchaseRecord, RecordId, RecordPatch, RecordStatus, Result, SpendGuardError, User,
};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::subscription::{
    ChangeType, CollectionSnapshot, RecordChangeEvent, SnapshotStream, SubscriptionManager,
};

/// Filter over the record collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordQuery {
    /// Only records submitted within this organization.
    pub organization: Option<String>,

    /// Only records submitted by this user id.
    pub submitted_by: Option<String>,

    /// Only records in one of these statuses.
    pub statuses: Option<Vec<RecordStatus>>,
}

impl RecordQuery {
    /// Match every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match one organization's records.
    pub fn organization(organization: impl Into<String>) -> Self {
        Self {
            organization: Some(organization.into()),
            ..Default::default()
        }
    }

    /// Match the records `user` is allowed to see.
    pub fn visible_to(user: &User) -> Self {
        let mut query = Self::organization(user.organization.clone());
        if !user.role.sees_organization() {
            query.submitted_by = Some(user.id.clone());
        }
        query
    }

    /// Restrict to the given statuses.
    pub fn with_statuses(mut self, statuses: Vec<RecordStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    /// Check if a record matches this query.
    pub fn matches(&self, record: &PurchaseRecord) -> bool {
        if let Some(ref org) = self.organization {
            if &record.submitted_by.organization != org {
                return false;
            }
        }

        if let Some(ref user_id) = self.submitted_by {
            if &record.submitted_by.user_id != user_id {
                return false;
            }
        }

        if let Some(ref statuses) = self.statuses {
            if !statuses.contains(&record.status()) {
                return false;
            }
        }

        true
    }
}

/// Persistence adapter for purchase records.
///
/// Records are never deleted. The store is the source of truth; any local
/// copy must reconcile against [`RecordStore::subscribe`] snapshots.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new record and return it with its assigned id.
    async fn create_record(&self, record: NewRecord) -> Result<PurchaseRecord>;

    /// Apply a partial update. Absent patch fields are left untouched.
    async fn update_record(&self, id: &RecordId, patch: &RecordPatch) -> Result<()>;

    /// Get a record by id.
    async fn get_record(&self, id: &RecordId) -> Result<Option<PurchaseRecord>>;

    /// List records matching a query, newest first.
    async fn list_records(&self, query: &RecordQuery) -> Result<Vec<PurchaseRecord>>;

    /// Stream full snapshots of a query, starting with the current one.
    async fn subscribe(&self, query: RecordQuery) -> Result<SnapshotStream>;

    /// Store binary content (a receipt image) and return a reference to it.
    async fn upload_binary(&self, bytes: Vec<u8>, path: &str) -> Result<String>;
}

/// Records in insertion order plus a version counter.
#[derive(Debug, Default)]
pub(crate) struct Collection {
    records: Vec<PurchaseRecord>,
    version: u64,
}

impl Collection {
    pub(crate) fn snapshot(&self, query: &RecordQuery) -> CollectionSnapshot {
        CollectionSnapshot {
            version: self.version,
            records: self
                .records
                .iter()
                .rev()
                .filter(|r| query.matches(r))
                .cloned()
                .collect(),
            taken_at: Utc::now(),
        }
    }
}

/// In-memory implementation of RecordStore.
pub struct InMemoryRecordStore {
    /// Main record storage.
    collection: Arc<RwLock<Collection>>,

    /// Uploaded binaries: path -> bytes.
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,

    /// Change subscriptions.
    subscriptions: SubscriptionManager,

    /// Simulated outage: every write fails while set.
    offline: AtomicBool,
}

impl InMemoryRecordStore {
    /// Create a new in-memory record store.
    pub fn new() -> Self {
        Self {
            collection: Arc::new(RwLock::new(Collection::default())),
            blobs: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: SubscriptionManager::new(),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulate a backend outage (or recovery). Reads keep working.
    pub fn set_offline(&self, offline: bool) {
        info!(offline, "record store availability changed");
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Read back an uploaded binary.
    pub async fn blob(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs.read().await.get(path).cloned()
    }

    /// Current collection version.
    pub async fn version(&self) -> u64 {
        self.collection.read().await.version
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SpendGuardError::Persistence(
                "record store is unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_record(&self, record: NewRecord) -> Result<PurchaseRecord> {
        self.ensure_writable()?;

        let mut collection = self.collection.write().await;
        let record = record.into_record(RecordId::new(Uuid::new_v4().to_string()), Utc::now());
        collection.version += 1;
        collection.records.push(record.clone());

        debug!(record_id = %record.id, version = collection.version, "record created");

        // Published under the write lock so subscribers see events in version order.
        self.subscriptions.publish(RecordChangeEvent {
            record_id: record.id.clone(),
            record: record.clone(),
            previous: None,
            change_type: ChangeType::Created,
            version: collection.version,
            timestamp: Utc::now(),
        });

        Ok(record)
    }

    async fn update_record(&self, id: &RecordId, patch: &RecordPatch) -> Result<()> {
        self.ensure_writable()?;

        let mut collection = self.collection.write().await;
        let position = collection
            .records
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| SpendGuardError::record_not_found(id.as_str()))?;

        if patch.is_empty() {
            return Ok(());
        }

        let previous = collection.records[position].clone();
        patch.apply_to(&mut collection.records[position]);
        let record = collection.records[position].clone();
        collection.version += 1;

        debug!(record_id = %id, status = %record.status(), version = collection.version, "record updated");

        self.subscriptions.publish(RecordChangeEvent {
            record_id: id.clone(),
            record,
            previous: Some(previous),
            change_type: ChangeType::Updated,
            version: collection.version,
            timestamp: Utc::now(),
        });

        Ok(())
    }

    async fn get_record(&self, id: &RecordId) -> Result<Option<PurchaseRecord>> {
        let collection = self.collection.read().await;
        Ok(collection.records.iter().find(|r| &r.id == id).cloned())
    }

    async fn list_records(&self, query: &RecordQuery) -> Result<Vec<PurchaseRecord>> {
        let collection = self.collection.read().await;
        Ok(collection.snapshot(query).records)
    }

    async fn subscribe(&self, query: RecordQuery) -> Result<SnapshotStream> {
        Ok(self.subscriptions.subscribe(self.collection.clone(), query))
    }

    async fn upload_binary(&self, bytes: Vec<u8>, path: &str) -> Result<String> {
        self.ensure_writable()?;

        let path = path.trim_start_matches('/').to_string();
        if path.is_empty() {
            return Err(SpendGuardError::Validation(
                "Upload path cannot be empty".to_string(),
            ));
        }

        let mut blobs = self.blobs.write().await;
        blobs.insert(path.clone(), bytes);

        Ok(format!("memory://{}", path))
    }
}
