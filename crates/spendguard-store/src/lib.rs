//! # SpendGuard Store
//!
//! Persistence adapter for purchase records, collection subscriptions and the
//! local record cache with optimistic updates.

pub mod cache;
pub mod store;
pub mod subscription;

pub use cache::{CachedRecord, RecordCache, SyncMode, SyncState};
pub use store::{InMemoryRecordStore, RecordQuery, RecordStore};
pub use subscription::{CollectionSnapshot, RecordChangeEvent, SnapshotStream};
