//! Purchase records: the audited entity.
//!
//! A [`PurchaseRecord`] is created once from a confirmed [`NewRecord`] and then
//! changes at most once more, when a reviewer acts on it. Its status and
//! rejection metadata are private: the only way to change them is to apply a
//! [`RecordPatch`], and only [`crate::review`] can build a patch that carries a
//! status.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extraction::ExtractionResult;
use crate::market::{CommitmentDetails, PriceIntelligence};
use crate::review;
use crate::types::{Flag, RecordStatus, RejectionReason, User};

/// Identifier assigned by the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier for a record that only exists in the local cache.
    pub fn local() -> Self {
        Self(format!("local-{}", Uuid::new_v4()))
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with("local-")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Who submitted a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitter {
    pub user_id: String,
    pub display_name: String,
    pub organization: String,
}

impl From<&User> for Submitter {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            display_name: user.display_name.clone(),
            organization: user.organization.clone(),
        }
    }
}

/// Metadata recorded when a reviewer rejects a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    /// Never empty.
    pub reasons: Vec<RejectionReason>,
    /// Trimmed reviewer notes. `None` when the reviewer left none.
    #[serde(default)]
    pub notes: Option<String>,
    pub rejected_by: String,
    pub rejected_at: DateTime<Utc>,
}

/// A submitted purchase under audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: RecordId,
    pub vendor: String,
    pub amount: f64,
    pub date: String,
    pub description: String,
    pub category: String,
    /// Intake flags, in the order they were raised.
    #[serde(default)]
    pub flags: Vec<Flag>,
    status: RecordStatus,
    pub submitted_by: Submitter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_gl_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_price_estimate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_subscription: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_intelligence: Option<PriceIntelligence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitments: Option<CommitmentDetails>,
    /// Present iff `status == REJECTED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rejection: Option<Rejection>,
    pub created_at: DateTime<Utc>,
}

impl PurchaseRecord {
    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        self.rejection.as_ref()
    }

    /// Transaction date, if it parses as `YYYY-MM-DD` (a trailing time part is ignored).
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        parse_transaction_date(&self.date)
    }

    /// Submitters see their own records; reviewers and viewers see their organization's.
    pub fn is_visible_to(&self, user: &User) -> bool {
        if user.role.sees_organization() {
            self.submitted_by.organization == user.organization
        } else {
            self.submitted_by.user_id == user.id
        }
    }
}

/// Parse a transaction date in `YYYY-MM-DD` form, tolerating a trailing time part.
pub fn parse_transaction_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let day = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// A confirmed intake result about to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub vendor: String,
    pub amount: f64,
    pub date: String,
    pub description: String,
    pub category: String,
    pub flags: Vec<Flag>,
    pub submitted_by: Submitter,
    pub file_ref: Option<String>,
    pub confidence: Option<u8>,
    pub suggested_gl_code: Option<String>,
    pub market_price_estimate: Option<f64>,
    pub is_subscription: Option<bool>,
    pub price_intelligence: Option<PriceIntelligence>,
    pub commitments: Option<CommitmentDetails>,
}

impl NewRecord {
    /// Start a record from a staged extraction.
    pub fn from_extraction(extraction: ExtractionResult, submitted_by: Submitter) -> Self {
        Self {
            vendor: extraction.vendor,
            amount: ExtractionResult::sanitize_amount(Some(extraction.amount)),
            date: extraction.date,
            description: extraction.description,
            category: extraction.category,
            flags: extraction.flags,
            submitted_by,
            file_ref: None,
            confidence: Some(extraction.confidence),
            suggested_gl_code: Some(extraction.suggested_gl_code)
                .filter(|code| !code.trim().is_empty()),
            market_price_estimate: extraction.market_price_estimate,
            is_subscription: extraction.is_subscription,
            price_intelligence: None,
            commitments: None,
        }
    }

    /// Status the record will be created with.
    pub fn initial_status(&self) -> RecordStatus {
        review::initial_status(&self.flags)
    }

    /// Materialize the record under the identifier the store assigned.
    pub fn into_record(self, id: RecordId, created_at: DateTime<Utc>) -> PurchaseRecord {
        let status = self.initial_status();
        PurchaseRecord {
            id,
            vendor: self.vendor,
            amount: self.amount,
            date: self.date,
            description: self.description,
            category: self.category,
            flags: self.flags,
            status,
            submitted_by: self.submitted_by,
            file_ref: self.file_ref,
            confidence: self.confidence,
            suggested_gl_code: self.suggested_gl_code,
            market_price_estimate: self.market_price_estimate,
            is_subscription: self.is_subscription,
            price_intelligence: self.price_intelligence,
            commitments: self.commitments,
            rejection: None,
            created_at,
        }
    }
}

/// Partial update to a record. Absent fields are omitted when serialized,
/// since the backing store rejects undefined values.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RecordPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<RecordStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rejection: Option<Rejection>,
}

impl RecordPatch {
    pub(crate) fn transition(status: RecordStatus, rejection: Option<Rejection>) -> Self {
        Self {
            status: Some(status),
            rejection,
        }
    }

    pub fn status(&self) -> Option<RecordStatus> {
        self.status
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        self.rejection.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.rejection.is_none()
    }

    /// Apply this patch. A status change always replaces the rejection metadata.
    pub fn apply_to(&self, record: &mut PurchaseRecord) {
        if let Some(status) = self.status {
            record.status = status;
            record.rejection = self.rejection.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::tests::sample;
    use crate::types::{FlagType, Role};

    fn submitter() -> Submitter {
        Submitter {
            user_id: "u1".into(),
            display_name: "Ada".into(),
            organization: "acme".into(),
        }
    }

    #[test]
    fn test_new_record_status_follows_flags() {
        let clean = NewRecord::from_extraction(sample("Staples", 10.0, "2024-01-10"), submitter());
        assert_eq!(clean.initial_status(), RecordStatus::Pending);

        let mut flagged = sample("Staples", 10.0, "2024-01-10");
        flagged.append_flag(Flag::new(FlagType::PolicyViolation, "Alcohol"));
        let flagged = NewRecord::from_extraction(flagged, submitter());
        let record = flagged.into_record(RecordId::new("r1"), Utc::now());
        assert_eq!(record.status(), RecordStatus::Flagged);
        assert!(record.rejection().is_none());
    }

    #[test]
    fn test_empty_gl_code_dropped() {
        let mut extraction = sample("Staples", 10.0, "2024-01-10");
        extraction.suggested_gl_code = "  ".into();
        let new = NewRecord::from_extraction(extraction, submitter());
        assert!(new.suggested_gl_code.is_none());
    }

    #[test]
    fn test_parse_transaction_date() {
        assert!(parse_transaction_date("2024-01-10").is_some());
        assert!(parse_transaction_date("2024-01-10T09:00:00Z").is_some());
        assert!(parse_transaction_date("Jan 10").is_none());
    }

    #[test]
    fn test_empty_patch_serializes_to_empty_object() {
        let patch = RecordPatch::default();
        assert!(patch.is_empty());
        assert_eq!(serde_json::to_string(&patch).unwrap(), "{}");
    }

    #[test]
    fn test_visibility() {
        let record = NewRecord::from_extraction(sample("Staples", 10.0, "2024-01-10"), submitter())
            .into_record(RecordId::new("r1"), Utc::now());

        let owner = User {
            id: "u1".into(),
            display_name: "Ada".into(),
            organization: "acme".into(),
            role: Role::Submitter,
        };
        let colleague = User { id: "u2".into(), ..owner.clone() };
        let reviewer = User { id: "u3".into(), role: Role::Reviewer, ..owner.clone() };
        let outsider = User {
            id: "u4".into(),
            organization: "globex".into(),
            role: Role::Viewer,
            ..owner.clone()
        };

        assert!(record.is_visible_to(&owner));
        assert!(!record.is_visible_to(&colleague));
        assert!(record.is_visible_to(&reviewer));
        assert!(!record.is_visible_to(&outsider));
    }

    #[test]
    fn test_local_ids() {
        assert!(RecordId::local().is_local());
        assert!(!RecordId::new("abc").is_local());
    }
}
