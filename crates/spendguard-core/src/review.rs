//! Review state machine.
//!
//! ```text
//!            create
//!   flags? ─────────► FLAGGED ──┐
//!      └────────────► PENDING ──┼─► VALIDATED
//!                               ├─► RESOLVED
//!                               └─► REJECTED (reason tags required)
//! ```
//!
//! All validation happens in [`plan_transition`], before any local mutation or
//! persistence call. The returned [`RecordPatch`] is the only way to change a
//! record's status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpendGuardError};
use crate::record::{PurchaseRecord, RecordPatch, Rejection};
use crate::types::{Flag, RecordStatus, RejectionReason, User};

/// A reviewer's decision on a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReviewAction {
    /// Approve the purchase.
    Validate,
    /// Confirm waste without going through formal rejection.
    Resolve,
    /// Reject with at least one reason tag.
    Reject {
        reasons: Vec<RejectionReason>,
        #[serde(default)]
        notes: Option<String>,
    },
}

impl ReviewAction {
    pub fn name(&self) -> &'static str {
        match self {
            ReviewAction::Validate => "validate",
            ReviewAction::Resolve => "resolve",
            ReviewAction::Reject { .. } => "reject",
        }
    }

    pub fn target_status(&self) -> RecordStatus {
        match self {
            ReviewAction::Validate => RecordStatus::Validated,
            ReviewAction::Resolve => RecordStatus::Resolved,
            ReviewAction::Reject { .. } => RecordStatus::Rejected,
        }
    }
}

/// Status a record is created with.
pub fn initial_status(flags: &[Flag]) -> RecordStatus {
    if flags.is_empty() {
        RecordStatus::Pending
    } else {
        RecordStatus::Flagged
    }
}

/// Check that `actor` may apply `action` to `record` and build the patch.
pub fn plan_transition(
    record: &PurchaseRecord,
    actor: &User,
    action: &ReviewAction,
    at: DateTime<Utc>,
) -> Result<RecordPatch> {
    if !actor.role.can_review() {
        return Err(SpendGuardError::Forbidden {
            action: action.name().to_string(),
            required: "reviewer".to_string(),
        });
    }

    if record.status().is_terminal() {
        return Err(SpendGuardError::InvalidTransition {
            record_id: record.id.to_string(),
            status: record.status(),
            action: action.name().to_string(),
        });
    }

    let patch = match action {
        ReviewAction::Validate | ReviewAction::Resolve => {
            RecordPatch::transition(action.target_status(), None)
        }
        ReviewAction::Reject { reasons, notes } => {
            let mut unique: Vec<RejectionReason> = Vec::with_capacity(reasons.len());
            for reason in reasons {
                if !unique.contains(reason) {
                    unique.push(*reason);
                }
            }
            if unique.is_empty() {
                return Err(SpendGuardError::Validation(
                    "At least one rejection reason is required".to_string(),
                ));
            }

            RecordPatch::transition(
                RecordStatus::Rejected,
                Some(Rejection {
                    reasons: unique,
                    notes: notes
                        .as_deref()
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(str::to_string),
                    rejected_by: actor.display_name.clone(),
                    rejected_at: at,
                }),
            )
        }
    };

    Ok(patch)
}
