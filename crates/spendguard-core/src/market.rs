//! Market-price and commitment intelligence attached to receipts.

use serde::{Deserialize, Serialize};

/// Canonical identity of a purchased item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    /// Stable identifier such as "office-chair-ergonomic".
    pub normalized_id: String,
    /// Human-readable item name used for market searches.
    pub item_name: String,
    /// Provider confidence, 0-100.
    pub confidence: u8,
}

/// Inclusive price range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

/// A cited source backing a market price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSource {
    pub title: String,
    pub url: String,
}

/// Result of a web-grounded market price search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPriceQuote {
    pub average_price: f64,
    pub price_range: PriceRange,
    pub confidence: u8,
    #[serde(default)]
    pub sources: Vec<PriceSource>,
    #[serde(default)]
    pub reasoning: String,
}

/// Where a record's price intelligence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceOrigin {
    /// Web-grounded market search.
    GroundedSearch,
    /// Fair-market estimate produced alongside the receipt extraction.
    ExtractionEstimate,
}

/// Price intelligence attached to a staged or submitted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceIntelligence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    /// Average fair-market price.
    pub state_average: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_range: Option<PriceRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    #[serde(default)]
    pub sources: Vec<PriceSource>,
    /// Submitted amount minus the average price, only when positive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub savings_opportunity: Option<f64>,
    pub origin: PriceOrigin,
}

impl PriceIntelligence {
    /// Build from a normalized item and a grounded market quote.
    pub fn from_grounded(item: &NormalizedItem, quote: MarketPriceQuote, amount: f64) -> Self {
        Self {
            normalized_id: Some(item.normalized_id.clone()),
            item_name: Some(item.item_name.clone()),
            state_average: quote.average_price,
            price_range: Some(quote.price_range),
            confidence: Some(quote.confidence.min(100)),
            sources: quote.sources,
            savings_opportunity: savings_opportunity(amount, quote.average_price),
            origin: PriceOrigin::GroundedSearch,
        }
    }

    /// Build from the market estimate that came with the base extraction.
    pub fn from_estimate(estimate: f64, amount: f64) -> Self {
        Self {
            normalized_id: None,
            item_name: None,
            state_average: estimate,
            price_range: None,
            confidence: None,
            sources: Vec::new(),
            savings_opportunity: savings_opportunity(amount, estimate),
            origin: PriceOrigin::ExtractionEstimate,
        }
    }
}

/// `amount - average`, reported only when positive.
pub fn savings_opportunity(amount: f64, average: f64) -> Option<f64> {
    let diff = amount - average;
    (diff.is_finite() && diff > 0.0).then_some(diff)
}

/// Returns true when `amount` sits more than `threshold` (a fraction) above `reference`.
pub fn exceeds_market(amount: f64, reference: f64, threshold: f64) -> bool {
    reference > 0.0 && amount > reference * (1.0 + threshold)
}

/// Recurring obligations implied by a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CommitmentDetails {
    pub is_recurring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewal_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_deadline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_clause: Option<String>,
}
