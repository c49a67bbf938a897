//! Structured data extracted from a receipt image.
//!
//! An [`ExtractionResult`] is staged in an intake session until the user
//! confirms it; it never reaches persistence on its own.

use serde::{Deserialize, Serialize};

use crate::market::{exceeds_market, PriceIntelligence, PriceOrigin};
use crate::types::{Flag, FlagType};

/// Amount above the extraction's own market estimate that raises a deviation flag.
pub const EXTRACTION_DEVIATION_THRESHOLD: f64 = 0.20;

/// Amount above a grounded market average that raises a deviation flag.
pub const GROUNDED_DEVIATION_THRESHOLD: f64 = 0.15;

/// Result of analyzing one receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub vendor: String,
    /// Always non-negative; 0 when the receipt had no readable total.
    pub amount: f64,
    /// Transaction date, normally `YYYY-MM-DD`.
    pub date: String,
    pub description: String,
    pub category: String,
    /// Provider confidence, 0-100.
    pub confidence: u8,
    pub suggested_gl_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_price_estimate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_subscription: Option<bool>,
    #[serde(default)]
    pub flags: Vec<Flag>,
}

impl ExtractionResult {
    /// Coerce a possibly missing or invalid amount to a non-negative number.
    pub fn sanitize_amount(raw: Option<f64>) -> f64 {
        match raw {
            Some(amount) if amount.is_finite() && amount >= 0.0 => amount,
            _ => 0.0,
        }
    }

    /// Clamp a confidence score into 0-100.
    pub fn sanitize_confidence(raw: Option<f64>) -> u8 {
        match raw {
            Some(c) if c.is_finite() => c.round().clamp(0.0, 100.0) as u8,
            _ => 0,
        }
    }

    pub fn has_flag(&self, flag_type: FlagType) -> bool {
        self.flags.iter().any(|f| f.flag_type == flag_type)
    }

    /// Append a flag. Flags are never removed or reordered during intake.
    pub fn append_flag(&mut self, flag: Flag) {
        self.flags.push(flag);
    }

    /// Raise a market-deviation flag when the amount exceeds the extraction's
    /// own market estimate by more than 20%. Returns true if a flag was added.
    pub fn check_estimate_deviation(&mut self) -> bool {
        let Some(estimate) = self.market_price_estimate else {
            return false;
        };
        if self.has_flag(FlagType::MarketDeviation)
            || !exceeds_market(self.amount, estimate, EXTRACTION_DEVIATION_THRESHOLD)
        {
            return false;
        }

        self.append_flag(deviation_flag(self.amount, estimate, "estimated market price"));
        true
    }

    /// Raise a market-deviation flag when grounded price intelligence shows the
    /// amount more than 15% above the market average. Returns true if a flag was added.
    pub fn check_grounded_deviation(&mut self, intel: &PriceIntelligence) -> bool {
        if intel.origin != PriceOrigin::GroundedSearch
            || self.has_flag(FlagType::MarketDeviation)
            || !exceeds_market(self.amount, intel.state_average, GROUNDED_DEVIATION_THRESHOLD)
        {
            return false;
        }

        let mut flag = deviation_flag(self.amount, intel.state_average, "market average");
        if let Some(first) = intel.sources.first() {
            flag.context = Some(format!("Source: {} ({})", first.title, first.url));
        }
        self.append_flag(flag);
        true
    }
}

fn deviation_flag(amount: f64, reference: f64, label: &str) -> Flag {
    let pct = (amount / reference - 1.0) * 100.0;
    Flag::new(
        FlagType::MarketDeviation,
        format!("Paid {:.0}% above the {}", pct, label),
    )
    .with_context(format!("Paid ${:.2} vs ${:.2}", amount, reference))
}
