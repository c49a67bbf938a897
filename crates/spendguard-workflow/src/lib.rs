//! # SpendGuard Workflow
//!
//! Everything between an uploaded receipt and a reviewed record:
//! - [`intake`] - intake sessions, extraction, duplicate gate and submission
//! - [`enrichment`] - concurrent price and commitment enrichment
//! - [`review_desk`] - reviewer actions with optimistic cache updates

pub mod enrichment;
pub mod intake;
pub mod review_desk;

pub use enrichment::{
    EnrichmentEvent, EnrichmentKind, EnrichmentStage, EnrichmentUpdate, TaskStatus,
};
pub use intake::{
    IntakeOrchestrator, IntakeSession, IntakeState, IntakeView, SharedSession, SubmitMode,
    SubmitOutcome,
};
pub use review_desk::ReviewDesk;
