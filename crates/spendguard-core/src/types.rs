//! Common types used across SpendGuard.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, SpendGuardError};

/// Lifecycle status of a purchase record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    /// Submitted without intake flags, awaiting review.
    Pending,
    /// Submitted with at least one intake flag, awaiting review.
    Flagged,
    /// Approved by a reviewer.
    Validated,
    /// Marked by a reviewer as confirmed waste, outside the rejection flow.
    Resolved,
    /// Rejected by a reviewer with reason tags.
    Rejected,
}

impl RecordStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [RecordStatus; 5] = [
        RecordStatus::Pending,
        RecordStatus::Flagged,
        RecordStatus::Validated,
        RecordStatus::Resolved,
        RecordStatus::Rejected,
    ];

    /// Returns true if no review action may leave this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordStatus::Validated | RecordStatus::Resolved | RecordStatus::Rejected
        )
    }

    /// Returns true if the record still awaits a reviewer.
    pub fn awaits_review(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "PENDING",
            RecordStatus::Flagged => "FLAGGED",
            RecordStatus::Validated => "VALIDATED",
            RecordStatus::Resolved => "RESOLVED",
            RecordStatus::Rejected => "REJECTED",
        }
    }

    /// Parse a status name, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        RecordStatus::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a user in an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Uploads receipts and sees their own records.
    #[default]
    Submitter,
    /// Approves, resolves and rejects records.
    Reviewer,
    /// Read-only access to the organization's records.
    Viewer,
}

impl Role {
    /// Returns true if this role may approve, resolve or reject records.
    pub fn can_review(&self) -> bool {
        matches!(self, Role::Reviewer)
    }

    /// Returns true if this role sees every record of its organization.
    pub fn sees_organization(&self) -> bool {
        matches!(self, Role::Reviewer | Role::Viewer)
    }
}

/// A user known to the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub organization: String,
    pub role: Role,
}

/// Kind of anomaly raised against a receipt at intake time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagType {
    /// Looks like a purchase that was already submitted.
    Duplicate,
    /// Priced materially above a fair-market estimate.
    MarketDeviation,
    /// Recurring subscription that is likely unused.
    ZombieSpend,
    /// Breaks a purchasing policy.
    PolicyViolation,
    /// Vendor is unusual for this organization or category.
    UnusualVendor,
    /// Looks like a purchase split to stay under an approval limit.
    SplitPurchase,
    /// Receipt is missing required information.
    MissingInfo,
    /// Any tag the provider returned that is not listed above.
    #[serde(other)]
    Other,
}

impl FlagType {
    /// Map a loosely formatted provider tag ("market deviation", "zombie-spend") to a flag type.
    pub fn from_tag(tag: &str) -> Self {
        let normalized: String = tag
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();

        match normalized.as_str() {
            "DUPLICATE" => FlagType::Duplicate,
            "MARKET_DEVIATION" | "PRICE_DEVIATION" | "OVERPRICED" => FlagType::MarketDeviation,
            "ZOMBIE_SPEND" | "ZOMBIE_SUBSCRIPTION" => FlagType::ZombieSpend,
            "POLICY_VIOLATION" => FlagType::PolicyViolation,
            "UNUSUAL_VENDOR" => FlagType::UnusualVendor,
            "SPLIT_PURCHASE" => FlagType::SplitPurchase,
            "MISSING_INFO" | "MISSING_INFORMATION" => FlagType::MissingInfo,
            _ => FlagType::Other,
        }
    }
}

/// An anomaly annotation attached to a record at intake time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Flag {
    pub fn new(flag_type: FlagType, reason: impl Into<String>) -> Self {
        Self {
            flag_type,
            reason: reason.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Fixed taxonomy of reasons a reviewer may select when rejecting a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    Waste,
    PolicyViolation,
    InsufficientDocumentation,
    Unauthorized,
    SuspectedFraud,
    BudgetExceeded,
    Duplicate,
    PriceAnomaly,
    Other,
}

impl RejectionReason {
    /// Human-readable label used in drafted emails and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            RejectionReason::Waste => "Waste",
            RejectionReason::PolicyViolation => "Policy violation",
            RejectionReason::InsufficientDocumentation => "Insufficient documentation",
            RejectionReason::Unauthorized => "Unauthorized purchase",
            RejectionReason::SuspectedFraud => "Suspected fraud",
            RejectionReason::BudgetExceeded => "Budget exceeded",
            RejectionReason::Duplicate => "Duplicate",
            RejectionReason::PriceAnomaly => "Price anomaly",
            RejectionReason::Other => "Other",
        }
    }
}

/// Raw receipt image as uploaded by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptImage {
    bytes: Vec<u8>,
    mime_type: String,
}

impl ReceiptImage {
    /// Wrap uploaded bytes. Empty uploads and non-image MIME types are rejected.
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Result<Self> {
        let mime_type = mime_type.into().trim().to_ascii_lowercase();
        if bytes.is_empty() {
            return Err(SpendGuardError::Validation(
                "Receipt image is empty".to_string(),
            ));
        }
        if !mime_type.starts_with("image/") {
            return Err(SpendGuardError::Validation(format!(
                "Unsupported receipt content type '{}'",
                mime_type
            )));
        }
        Ok(Self { bytes, mime_type })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// File extension derived from the MIME subtype.
    pub fn extension(&self) -> &str {
        match self.mime_type.split_once('/').map(|(_, sub)| sub) {
            Some("jpeg") | Some("jpg") => "jpg",
            Some("png") => "png",
            Some("webp") => "webp",
            Some("heic") => "heic",
            Some("gif") => "gif",
            _ => "bin",
        }
    }

    /// SHA-256 of the image bytes, hex-encoded.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}
