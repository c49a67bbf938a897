//! Collection subscriptions.
//!
//! Subscribers receive the *full* matching collection on every change that
//! touches it, starting with an initial snapshot as soon as they subscribe.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use spendguard_core::{PurchaseRecord, RecordId};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::store::{Collection, RecordQuery};

/// A record change event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordChangeEvent {
    /// The record that changed.
    pub record_id: RecordId,

    /// The record after the change.
    pub record: PurchaseRecord,

    /// The record before the change (None if new).
    pub previous: Option<PurchaseRecord>,

    /// Type of change.
    pub change_type: ChangeType,

    /// Collection version after the change.
    pub version: u64,

    /// Timestamp of the change.
    pub timestamp: DateTime<Utc>,
}

impl RecordChangeEvent {
    /// Returns true if the change is visible through `query`, before or after.
    pub fn touches(&self, query: &RecordQuery) -> bool {
        query.matches(&self.record) || self.previous.as_ref().is_some_and(|p| query.matches(p))
    }
}

/// Type of record change. Records are never deleted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// New record created.
    Created,
    /// Existing record updated.
    Updated,
}

/// Full view of a collection query at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub version: u64,
    /// Newest first.
    pub records: Vec<PurchaseRecord>,
    pub taken_at: DateTime<Utc>,
}

/// Stream of collection snapshots.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = CollectionSnapshot> + Send>>;

/// Manager for collection subscriptions.
pub struct SubscriptionManager {
    /// Sender for broadcasting events.
    sender: broadcast::Sender<RecordChangeEvent>,

    /// Active subscriptions.
    subscriptions: Arc<Mutex<HashMap<Uuid, RecordQuery>>>,
}

/// Removes its subscription from the registry when the stream is dropped.
struct SubscriptionGuard {
    id: Uuid,
    subscriptions: Arc<Mutex<HashMap<Uuid, RecordQuery>>>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.remove(&self.id);
    }
}

struct StreamState {
    collection: Arc<RwLock<Collection>>,
    receiver: broadcast::Receiver<RecordChangeEvent>,
    query: RecordQuery,
    initial: bool,
    _guard: SubscriptionGuard,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1000);
        Self {
            sender,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to a collection query. The first item is the current snapshot.
    pub(crate) fn subscribe(
        &self,
        collection: Arc<RwLock<Collection>>,
        query: RecordQuery,
    ) -> SnapshotStream {
        let id = Uuid::new_v4();
        let receiver = self.sender.subscribe();

        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, query.clone());

        let state = StreamState {
            collection,
            receiver,
            query,
            initial: true,
            _guard: SubscriptionGuard {
                id,
                subscriptions: self.subscriptions.clone(),
            },
        };

        Box::pin(futures::stream::unfold(state, |mut state| async move {
            if !state.initial {
                loop {
                    match state.receiver.recv().await {
                        Ok(event) if event.touches(&state.query) => break,
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            // Resync with a fresh snapshot.
                            warn!(skipped, "subscription lagged behind change events");
                            break;
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
            state.initial = false;

            let snapshot = state.collection.read().await.snapshot(&state.query);
            Some((snapshot, state))
        }))
    }

    /// Publish a change event.
    pub fn publish(&self, event: RecordChangeEvent) {
        // Broadcast to all subscribers (they filter locally)
        let _ = self.sender.send(event);
    }

    /// Get the number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spendguard_core::{ExtractionResult, NewRecord, Submitter};

    fn record(id: &str, org: &str) -> PurchaseRecord {
        let extraction = ExtractionResult {
            vendor: "Staples".into(),
            amount: 10.0,
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
            user_id: "u1".into(),
            display_name: "Ada".into(),
            organization: org.into(),
        };
        NewRecord::from_extraction(extraction, submitter).into_record(RecordId::new(id), Utc::now())
    }

    fn event(record: PurchaseRecord) -> RecordChangeEvent {
        RecordChangeEvent {
            record_id: record.id.clone(),
            record,
            previous: None,
            change_type: ChangeType::Created,
            version: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_event_touches_query() {
        let query = RecordQuery::organization("acme");
        assert!(event(record("r1", "acme")).touches(&query));
        assert!(!event(record("r2", "globex")).touches(&query));
        assert!(event(record("r3", "globex")).touches(&RecordQuery::all()));
    }

    #[tokio::test]
    async fn test_subscription_registry_follows_stream_lifetime() {
        let manager = SubscriptionManager::new();
        let collection = Arc::new(RwLock::new(Collection::default()));

        let stream = manager.subscribe(collection, RecordQuery::all());
        assert_eq!(manager.subscription_count(), 1);

        drop(stream);
        assert_eq!(manager.subscription_count(), 0);
    }
}
