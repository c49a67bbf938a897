//! Provider trait.

use async_trait::async_trait;
use spendguard_core::{
    CommitmentDetails, ExtractionResult, MarketPriceQuote, NormalizedItem, ReceiptImage, Result,
};

/// Remote extraction and insight service.
///
/// Every call may fail. Callers treat a failure as "no data" and keep going;
/// nothing here is allowed to abort a submission on its own.
#[async_trait]
pub trait InsightProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Read vendor, amount, date, category and anomaly flags off a receipt.
    async fn analyze_receipt(&self, image: &ReceiptImage) -> Result<ExtractionResult>;

    /// Map a purchase to a canonical item identity.
    async fn normalize_item(
        &self,
        vendor: &str,
        description: &str,
        amount: f64,
    ) -> Result<NormalizedItem>;

    /// Web-grounded fair-market price search.
    async fn search_market_price(
        &self,
        item_name: &str,
        description: &str,
        vendor: &str,
    ) -> Result<MarketPriceQuote>;

    /// Detect recurring obligations implied by a purchase.
    async fn extract_commitments(
        &self,
        vendor: &str,
        description: &str,
        amount: f64,
    ) -> Result<CommitmentDetails>;

    /// Draft a plain-text email explaining a rejection.
    async fn draft_rejection_email(
        &self,
        vendor: &str,
        amount: f64,
        reason: &str,
        recipient: &str,
    ) -> Result<String>;

    /// Answer a free-form question about the spend data.
    async fn generate_insight(&self, query: &str, data_summary: &str) -> Result<String>;
}
