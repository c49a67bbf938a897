//! Deterministic provider for tests and offline runs.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use spendguard_core::{
    CommitmentDetails, ExtractionResult, Flag, FlagType, MarketPriceQuote, NormalizedItem,
    PriceRange, PriceSource, ReceiptImage, Result, SpendGuardError,
};

use crate::provider::InsightProvider;

/// One call observed by a [`ScriptedProvider`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    AnalyzeReceipt { mime_type: String, size: usize },
    NormalizeItem { vendor: String, description: String },
    SearchMarketPrice { item_name: String },
    ExtractCommitments { vendor: String },
    DraftRejectionEmail { vendor: String, reason: String },
    GenerateInsight { query: String },
}

#[derive(Default)]
struct Script {
    /// Consumed front to back; the last entry repeats.
    extractions: VecDeque<Option<ExtractionResult>>,
    normalized: Option<NormalizedItem>,
    quote: Option<MarketPriceQuote>,
    commitments: Option<CommitmentDetails>,
    email: Option<String>,
    insight: Option<String>,
    extraction_delay: Duration,
    price_delay: Duration,
    commitments_delay: Duration,
}

/// [`InsightProvider`] that answers from a script.
///
/// An unscripted (or `None`) response makes the call fail with a provider
/// error, which is how tests simulate an unavailable service.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
    calls: Mutex<Vec<ProviderCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unavailable(call: &str) -> SpendGuardError {
    SpendGuardError::Provider(format!("scripted provider has no response for {call}"))
}

impl ScriptedProvider {
    /// A provider where every call fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider with plausible answers for every call, used by the node
    /// when no remote provider is configured.
    pub fn demo() -> Self {
        let extraction = ExtractionResult {
            vendor: "OfficeMax".to_string(),
            amount: 400.0,
            date: Utc::now().format("%Y-%m-%d").to_string(),
            description: "Ergonomic office chair".to_string(),
            category: "Office Furniture".to_string(),
            confidence: 88,
            suggested_gl_code: "6150".to_string(),
            market_price_estimate: Some(310.0),
            is_subscription: Some(false),
            flags: vec![Flag::new(
                FlagType::UnusualVendor,
                "First purchase from this vendor",
            )],
        };
        Self::new()
            .with_extraction(Some(extraction))
            .with_normalized_item(Some(NormalizedItem {
                normalized_id: "office-chair-ergonomic".to_string(),
                item_name: "Ergonomic office chair".to_string(),
                confidence: 82,
            }))
            .with_market_quote(Some(MarketPriceQuote {
                average_price: 320.0,
                price_range: PriceRange { min: 250.0, max: 410.0 },
                confidence: 74,
                sources: vec![PriceSource {
                    title: "Office chair price survey".to_string(),
                    url: "https://example.com/office-chairs".to_string(),
                }],
                reasoning: "Median of mid-range ergonomic chairs".to_string(),
            }))
            .with_commitments(Some(CommitmentDetails::default()))
            .with_email(Some(
                "Hello,\n\nYour expense could not be approved. Please contact Finance \
                 if you have questions.\n\nFinance team"
                    .to_string(),
            ))
            .with_insight(Some(
                "Spend is concentrated in a few categories; review flagged records first."
                    .to_string(),
            ))
    }

    pub fn with_extraction(self, extraction: Option<ExtractionResult>) -> Self {
        {
            let mut script = lock(&self.script);
            script.extractions.clear();
            script.extractions.push_back(extraction);
        }
        self
    }

    /// Queue another extraction result, e.g. for a retake.
    pub fn then_extraction(self, extraction: Option<ExtractionResult>) -> Self {
        lock(&self.script).extractions.push_back(extraction);
        self
    }

    pub fn with_normalized_item(self, item: Option<NormalizedItem>) -> Self {
        lock(&self.script).normalized = item;
        self
    }

    pub fn with_market_quote(self, quote: Option<MarketPriceQuote>) -> Self {
        lock(&self.script).quote = quote;
        self
    }

    pub fn with_commitments(self, commitments: Option<CommitmentDetails>) -> Self {
        lock(&self.script).commitments = commitments;
        self
    }

    pub fn with_email(self, email: Option<String>) -> Self {
        lock(&self.script).email = email;
        self
    }

    pub fn with_insight(self, insight: Option<String>) -> Self {
        lock(&self.script).insight = insight;
        self
    }

    pub fn with_extraction_delay(self, delay: Duration) -> Self {
        lock(&self.script).extraction_delay = delay;
        self
    }

    /// Delay applied to both normalization and market search.
    pub fn with_price_delay(self, delay: Duration) -> Self {
        lock(&self.script).price_delay = delay;
        self
    }

    pub fn with_commitments_delay(self, delay: Duration) -> Self {
        lock(&self.script).commitments_delay = delay;
        self
    }

    /// Calls observed so far, in order.
    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: ProviderCall) {
        lock(&self.calls).push(call);
    }

    async fn pause(delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl InsightProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn analyze_receipt(&self, image: &ReceiptImage) -> Result<ExtractionResult> {
        self.record(ProviderCall::AnalyzeReceipt {
            mime_type: image.mime_type().to_string(),
            size: image.bytes().len(),
        });
        let (delay, next) = {
            let mut script = lock(&self.script);
            let next = if script.extractions.len() > 1 {
                script.extractions.pop_front().flatten()
            } else {
                script.extractions.front().cloned().flatten()
            };
            (script.extraction_delay, next)
        };
        Self::pause(delay).await;
        next.ok_or_else(|| unavailable("analyze_receipt"))
    }

    async fn normalize_item(
        &self,
        vendor: &str,
        description: &str,
        _amount: f64,
    ) -> Result<NormalizedItem> {
        self.record(ProviderCall::NormalizeItem {
            vendor: vendor.to_string(),
            description: description.to_string(),
        });
        let (delay, item) = {
            let script = lock(&self.script);
            (script.price_delay, script.normalized.clone())
        };
        Self::pause(delay).await;
        item.ok_or_else(|| unavailable("normalize_item"))
    }

    async fn search_market_price(
        &self,
        item_name: &str,
        _description: &str,
        _vendor: &str,
    ) -> Result<MarketPriceQuote> {
        self.record(ProviderCall::SearchMarketPrice {
            item_name: item_name.to_string(),
        });
        let (delay, quote) = {
            let script = lock(&self.script);
            (script.price_delay, script.quote.clone())
        };
        Self::pause(delay).await;
        quote.ok_or_else(|| unavailable("search_market_price"))
    }

    async fn extract_commitments(
        &self,
        vendor: &str,
        _description: &str,
        _amount: f64,
    ) -> Result<CommitmentDetails> {
        self.record(ProviderCall::ExtractCommitments {
            vendor: vendor.to_string(),
        });
        let (delay, commitments) = {
            let script = lock(&self.script);
            (script.commitments_delay, script.commitments.clone())
        };
        Self::pause(delay).await;
        commitments.ok_or_else(|| unavailable("extract_commitments"))
    }

    async fn draft_rejection_email(
        &self,
        vendor: &str,
        _amount: f64,
        reason: &str,
        _recipient: &str,
    ) -> Result<String> {
        self.record(ProviderCall::DraftRejectionEmail {
            vendor: vendor.to_string(),
            reason: reason.to_string(),
        });
        lock(&self.script)
            .email
            .clone()
            .ok_or_else(|| unavailable("draft_rejection_email"))
    }

    async fn generate_insight(&self, query: &str, _data_summary: &str) -> Result<String> {
        self.record(ProviderCall::GenerateInsight {
            query: query.to_string(),
        });
        lock(&self.script)
            .insight
            .clone()
            .ok_or_else(|| unavailable("generate_insight"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extraction(vendor: &str) -> ExtractionResult {
        ExtractionResult {
            vendor: vendor.to_string(),
            amount: 10.0,
            date: "2024-01-10".to_string(),
            description: "Paper".to_string(),
            category: "Supplies".to_string(),
            confidence: 90,
            suggested_gl_code: "6100".to_string(),
            market_price_estimate: None,
            is_subscription: None,
            flags: Vec::new(),
        }
    }

    fn image() -> ReceiptImage {
        ReceiptImage::new(vec![1, 2, 3], "image/png").unwrap()
    }

    #[tokio::test]
    async fn test_unscripted_calls_fail() {
        let provider = ScriptedProvider::new();
        assert!(provider.analyze_receipt(&image()).await.is_err());
        assert!(provider.generate_insight("q", "d").await.is_err());
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_extraction_queue_repeats_last() {
        let provider = ScriptedProvider::new()
            .with_extraction(Some(extraction("First")))
            .then_extraction(Some(extraction("Second")));

        assert_eq!(provider.analyze_receipt(&image()).await.unwrap().vendor, "First");
        assert_eq!(provider.analyze_receipt(&image()).await.unwrap().vendor, "Second");
        assert_eq!(provider.analyze_receipt(&image()).await.unwrap().vendor, "Second");
    }

    #[tokio::test]
    async fn test_calls_are_recorded() {
        let provider = ScriptedProvider::demo();
        provider.normalize_item("OfficeMax", "Chair", 400.0).await.unwrap();
        provider.search_market_price("Chair", "Chair", "OfficeMax").await.unwrap();

        assert_eq!(
            provider.calls(),
            vec![
                ProviderCall::NormalizeItem {
                    vendor: "OfficeMax".into(),
                    description: "Chair".into()
                },
                ProviderCall::SearchMarketPrice {
                    item_name: "Chair".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_demo_extraction_is_dated_today() {
        let result = ScriptedProvider::demo().analyze_receipt(&image()).await.unwrap();
        assert_eq!(result.date, Utc::now().format("%Y-%m-%d").to_string());
    }
}
