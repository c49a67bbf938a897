//! Duplicate detection for incoming receipts.
//!
//! Three independent checks each contribute a fixed weight. A pair counts as
//! a duplicate only when the score reaches [`MATCH_THRESHOLD`] *and* at least
//! [`MIN_SIGNALS`] checks matched, so one strong signal alone never triggers.

use serde::{Deserialize, Serialize};

use crate::extraction::ExtractionResult;
use crate::record::{parse_transaction_date, PurchaseRecord};

pub const VENDOR_WEIGHT: u32 = 30;
pub const AMOUNT_WEIGHT: u32 = 40;
pub const DATE_WEIGHT: u32 = 30;
pub const MATCH_THRESHOLD: u32 = 60;
pub const MIN_SIGNALS: usize = 2;

/// Relative tolerance against the larger of the two amounts.
pub const AMOUNT_TOLERANCE: f64 = 0.01;

/// Maximum absolute distance between transaction dates.
pub const DATE_WINDOW_DAYS: i64 = 60;

/// The fields of a receipt the scorer looks at.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateCandidate<'a> {
    pub vendor: &'a str,
    pub amount: f64,
    pub date: &'a str,
}

impl<'a> From<&'a ExtractionResult> for DuplicateCandidate<'a> {
    fn from(result: &'a ExtractionResult) -> Self {
        Self {
            vendor: &result.vendor,
            amount: result.amount,
            date: &result.date,
        }
    }
}

impl<'a> From<&'a PurchaseRecord> for DuplicateCandidate<'a> {
    fn from(record: &'a PurchaseRecord) -> Self {
        Self {
            vendor: &record.vendor,
            amount: record.amount,
            date: &record.date,
        }
    }
}

/// Score of one candidate/existing pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairScore {
    pub score: u32,
    pub reasons: Vec<String>,
}

impl PairScore {
    /// Both the score threshold and the two-signal rule must hold.
    pub fn is_match(&self) -> bool {
        self.score >= MATCH_THRESHOLD && self.reasons.len() >= MIN_SIGNALS
    }
}

/// An existing record that likely duplicates the candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub record: PurchaseRecord,
    pub score: u32,
    pub reasons: Vec<String>,
}

/// Score a candidate against one existing receipt.
pub fn score_pair(candidate: DuplicateCandidate<'_>, existing: DuplicateCandidate<'_>) -> PairScore {
    let mut score = 0;
    let mut reasons = Vec::new();

    if same_vendor(candidate.vendor, existing.vendor) {
        score += VENDOR_WEIGHT;
        reasons.push("Same vendor".to_string());
    }

    if same_amount(candidate.amount, existing.amount) {
        score += AMOUNT_WEIGHT;
        reasons.push("Same amount".to_string());
    }

    if let Some(days) = days_apart(candidate.date, existing.date) {
        if days <= DATE_WINDOW_DAYS {
            score += DATE_WEIGHT;
            reasons.push(format!("Within {} days", days));
        }
    }

    PairScore { score, reasons }
}

/// Find likely duplicates of `candidate` among `existing`, highest score first.
///
/// Ties keep the order of `existing`. The scan never mutates the records.
pub fn find_duplicates<'a, C>(candidate: C, existing: &[PurchaseRecord]) -> Vec<DuplicateMatch>
where
    C: Into<DuplicateCandidate<'a>>,
{
    let candidate = candidate.into();

    let mut matches: Vec<DuplicateMatch> = existing
        .iter()
        .filter_map(|record| {
            let pair = score_pair(candidate, record.into());
            pair.is_match().then(|| DuplicateMatch {
                record: record.clone(),
                score: pair.score,
                reasons: pair.reasons,
            })
        })
        .collect();

    // sort_by is stable, so equal scores keep input order
    matches.sort_by(|a, b| b.score.cmp(&a.score));
    matches
}

fn same_vendor(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    !a.is_empty() && a.to_lowercase() == b.to_lowercase()
}

fn same_amount(a: f64, b: f64) -> bool {
    let larger = a.abs().max(b.abs());
    if larger == 0.0 {
        return true;
    }
    (a - b).abs() <= larger * AMOUNT_TOLERANCE
}

fn days_apart(a: &str, b: &str) -> Option<i64> {
    let a = parse_transaction_date(a)?;
    let b = parse_transaction_date(b)?;
    Some((a - b).num_days().abs())
}
