//! Keeps the record cache in step with the store.

use std::sync::Arc;

use futures::StreamExt;
use spendguard_store::RecordQuery;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::state::AppState;

/// Background task that reconciles the cache on every store snapshot.
pub struct SyncEngine {
    state: AppState,
    retry_delay: Duration,
}

impl SyncEngine {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Run the sync loop. Resubscribes whenever the subscription ends.
    pub async fn run(self: Arc<Self>) {
        info!("record sync started");

        loop {
            match self.state.store.subscribe(RecordQuery::all()).await {
                Ok(mut snapshots) => {
                    while let Some(snapshot) = snapshots.next().await {
                        debug!(
                            version = snapshot.version,
                            records = snapshot.records.len(),
                            "reconciling record cache"
                        );
                        self.state.cache.write().await.reconcile(snapshot);
                    }
                    warn!("record subscription ended; resubscribing");
                }
                Err(e) => error!(error = %e, "record subscription failed"),
            }

            sleep(self.retry_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spendguard_core::{ExtractionResult, NewRecord, Submitter};
    use spendguard_insight::ScriptedProvider;
    use spendguard_store::{InMemoryRecordStore, RecordStore};

    #[tokio::test]
    async fn test_cache_follows_store() {
        let store = Arc::new(InMemoryRecordStore::new());
        let state = AppState::new(Arc::new(ScriptedProvider::new()), store.clone(), Vec::new());
        tokio::spawn(Arc::new(SyncEngine::new(state.clone())).run());

        let extraction = ExtractionResult {
            vendor: "Staples".into(),
            amount: 12.0,
            date: "2024-01-10".into(),
            description: "Pens".into(),
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
            organization: "acme".into(),
        };
        let record = store
            .create_record(NewRecord::from_extraction(extraction, submitter))
            .await
            .unwrap();

        for _ in 0..100 {
            if state.cache.read().await.get(&record.id).is_some() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("cache never picked up the new record");
    }
}
