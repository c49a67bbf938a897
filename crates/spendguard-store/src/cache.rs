//! Local record cache with two-phase optimistic updates.
//!
//! The cache mirrors the store's collection for fast reads. Review actions are
//! applied here first, tagged [`SyncState::Unconfirmed`], and then either
//! confirmed or rolled back once the store answers. After a failed write the
//! cache drops into [`SyncMode::Sandbox`]: changes stay local and are tagged
//! [`SyncState::LocalOnly`] instead of silently diverging from the store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spendguard_core::{PurchaseRecord, RecordId, RecordPatch, Result, SpendGuardError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::RecordQuery;
use crate::subscription::CollectionSnapshot;

/// Sync state of one cached record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    /// Matches the store.
    Confirmed,
    /// Local change awaiting the store's acknowledgement.
    Unconfirmed { update_id: Uuid },
    /// Changed or created while in sandbox mode; never written to the store.
    LocalOnly,
}

/// Whether the cache writes through to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncMode {
    /// Writes go to the store.
    Live,
    /// A write failed; changes stay local until the user goes live again.
    Sandbox {
        reason: String,
        since: DateTime<Utc>,
    },
}

/// A cached record and its sync state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    pub record: PurchaseRecord,
    pub sync: SyncState,
}

#[derive(Debug, Clone)]
struct PendingChange {
    record_id: RecordId,
    original: PurchaseRecord,
}

/// Local copy of the record collection.
#[derive(Debug)]
pub struct RecordCache {
    /// Newest first.
    entries: Vec<CachedRecord>,
    pending: HashMap<Uuid, PendingChange>,
    mode: SyncMode,
    version: u64,
}

impl RecordCache {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            pending: HashMap::new(),
            mode: SyncMode::Live,
            version: 0,
        }
    }

    /// Replace the cached view with a store snapshot.
    ///
    /// Records with an unconfirmed change keep their local version. Local-only
    /// changes are kept while in sandbox mode; once live, the store's view of
    /// those records wins. Local-only records the store has never seen are
    /// kept on top.
    pub fn reconcile(&mut self, snapshot: CollectionSnapshot) {
        if snapshot.version < self.version {
            warn!(
                snapshot_version = snapshot.version,
                cache_version = self.version,
                "ignoring stale snapshot"
            );
            return;
        }

        let mut overlays: HashMap<RecordId, CachedRecord> = self
            .entries
            .drain(..)
            .filter(|e| e.sync != SyncState::Confirmed)
            .map(|e| (e.record.id.clone(), e))
            .collect();

        let sandbox = self.is_sandbox();
        let mut entries: Vec<CachedRecord> = snapshot
            .records
            .into_iter()
            .map(|record| match overlays.remove(&record.id) {
                Some(local) if sandbox || local.sync != SyncState::LocalOnly => local,
                Some(_) => {
                    debug!(record_id = %record.id, "dropping local-only change for stored record");
                    CachedRecord {
                        record,
                        sync: SyncState::Confirmed,
                    }
                }
                None => CachedRecord {
                    record,
                    sync: SyncState::Confirmed,
                },
            })
            .collect();

        // Whatever is left was never persisted.
        let mut local_only: Vec<CachedRecord> = overlays.into_values().collect();
        local_only.sort_by(|a, b| b.record.created_at.cmp(&a.record.created_at));
        local_only.append(&mut entries);

        self.entries = local_only;
        self.version = snapshot.version;
    }

    pub fn get(&self, id: &RecordId) -> Option<&CachedRecord> {
        self.entries.iter().find(|e| &e.record.id == id)
    }

    /// Cached records matching `query`, newest first.
    pub fn records(&self, query: &RecordQuery) -> Vec<PurchaseRecord> {
        self.entries
            .iter()
            .filter(|e| query.matches(&e.record))
            .map(|e| e.record.clone())
            .collect()
    }

    /// Cached entries matching `query`, with their sync state.
    pub fn entries(&self, query: &RecordQuery) -> Vec<CachedRecord> {
        self.entries
            .iter()
            .filter(|e| query.matches(&e.record))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Phase one: apply `patch` locally, remembering the prior value.
    pub fn apply_tentative(&mut self, id: &RecordId, patch: &RecordPatch) -> Result<Uuid> {
        let entry = self.entry_mut(id)?;
        let original = entry.record.clone();
        let update_id = Uuid::new_v4();

        patch.apply_to(&mut entry.record);
        entry.sync = SyncState::Unconfirmed { update_id };

        self.pending.insert(
            update_id,
            PendingChange {
                record_id: id.clone(),
                original,
            },
        );
        Ok(update_id)
    }

    /// Phase two (success): the store acknowledged the change.
    pub fn confirm(&mut self, update_id: Uuid) -> bool {
        let Some(change) = self.pending.remove(&update_id) else {
            return false;
        };
        if let Some(entry) = self.entries.iter_mut().find(|e| e.record.id == change.record_id) {
            entry.sync = SyncState::Confirmed;
        }
        true
    }

    /// Phase two (failure): restore the value from before the tentative change.
    pub fn roll_back(&mut self, update_id: Uuid) -> bool {
        let Some(change) = self.pending.remove(&update_id) else {
            return false;
        };
        if let Some(entry) = self.entries.iter_mut().find(|e| e.record.id == change.record_id) {
            entry.record = change.original;
            entry.sync = SyncState::Confirmed;
        }
        true
    }

    /// Apply a change that will never reach the store (sandbox mode).
    pub fn apply_local(&mut self, id: &RecordId, patch: &RecordPatch) -> Result<()> {
        let entry = self.entry_mut(id)?;
        patch.apply_to(&mut entry.record);
        entry.sync = SyncState::LocalOnly;
        Ok(())
    }

    /// Add a record created while in sandbox mode.
    pub fn insert_local(&mut self, record: PurchaseRecord) {
        self.entries.insert(
            0,
            CachedRecord {
                record,
                sync: SyncState::LocalOnly,
            },
        );
    }

    /// Add a record the store just acknowledged, ahead of the next snapshot.
    pub fn insert_confirmed(&mut self, record: PurchaseRecord) {
        if self.get(&record.id).is_some() {
            return;
        }
        self.entries.insert(
            0,
            CachedRecord {
                record,
                sync: SyncState::Confirmed,
            },
        );
    }

    pub fn mode(&self) -> &SyncMode {
        &self.mode
    }

    pub fn is_sandbox(&self) -> bool {
        matches!(self.mode, SyncMode::Sandbox { .. })
    }

    /// Stop writing to the store. Has no effect if already in sandbox mode.
    pub fn enter_sandbox(&mut self, reason: impl Into<String>) {
        if self.is_sandbox() {
            return;
        }
        let reason = reason.into();
        warn!(%reason, "switching record cache to sandbox mode");
        self.mode = SyncMode::Sandbox {
            reason,
            since: Utc::now(),
        };
    }

    /// Resume writing to the store.
    ///
    /// Local-only changes are not replayed. They stay flagged until the next
    /// snapshot replaces them with the store's view; records the store never
    /// saw stay local.
    pub fn go_live(&mut self) {
        if self.is_sandbox() {
            info!(unsynced = self.unsynced_count(), "record cache back in live mode");
        }
        self.mode = SyncMode::Live;
    }

    /// Number of records whose local state differs from the store.
    pub fn unsynced_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.sync != SyncState::Confirmed)
            .count()
    }

    fn entry_mut(&mut self, id: &RecordId) -> Result<&mut CachedRecord> {
        self.entries
            .iter_mut()
            .find(|e| &e.record.id == id)
            .ok_or_else(|| SpendGuardError::record_not_found(id.as_str()))
    }
}

impl Default for RecordCache {
    fn default() -> Self {
        Self::new()
    }
}
