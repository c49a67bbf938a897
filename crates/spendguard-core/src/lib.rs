//! # SpendGuard Core
//!
//! Core primitives and policy for procurement audits.
//!
//! This crate provides the fundamental building blocks:
//! - [`PurchaseRecord`] - A submitted purchase under audit
//! - [`ExtractionResult`] - Structured data read off a receipt
//! - [`duplicate`] - Heuristic duplicate scoring
//! - [`review`] - The review state machine (sole writer of record status)
//! - [`SpendGuardError`] - Error types shared by every crate

pub mod duplicate;
pub mod error;
pub mod extraction;
pub mod market;
pub mod record;
pub mod review;
pub mod summary;
pub mod types;

// Re-exports for convenience
pub use duplicate::{find_duplicates, DuplicateCandidate, DuplicateMatch};
pub use error::{Result, SpendGuardError};
pub use extraction::ExtractionResult;
pub use market::{
    CommitmentDetails, MarketPriceQuote, NormalizedItem, PriceIntelligence, PriceOrigin,
    PriceRange, PriceSource,
};
pub use record::{NewRecord, PurchaseRecord, RecordId, RecordPatch, Rejection, Submitter};
pub use review::ReviewAction;
pub use summary::DashboardSummary;
pub use types::*;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::duplicate::{find_duplicates, DuplicateMatch};
    pub use crate::error::{Result, SpendGuardError};
    pub use crate::extraction::ExtractionResult;
    pub use crate::record::{NewRecord, PurchaseRecord, RecordId, RecordPatch, Submitter};
    pub use crate::review::ReviewAction;
    pub use crate::types::{Flag, FlagType, ReceiptImage, RecordStatus, RejectionReason, Role, User};
}
