//! Background enrichment of a staged extraction.
//!
//! Two tasks run side by side: price intelligence (normalize, then grounded
//! search) and commitment extraction. Each emits zero or more progress
//! updates followed by exactly one terminal event.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use spendguard_core::{CommitmentDetails, ExtractionResult, PriceIntelligence};
use spendguard_insight::InsightProvider;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Which enrichment task an update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentKind {
    Price,
    Commitments,
}

/// Progress stages of the price task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrichmentStage {
    Normalizing,
    Searching,
    Complete,
}

/// Enrichment messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnrichmentEvent {
    /// Non-terminal progress report.
    Progress {
        kind: EnrichmentKind,
        stage: EnrichmentStage,
    },

    /// Price intelligence, grounded or from the extraction's own estimate.
    PriceReady { intelligence: PriceIntelligence },

    /// No price data at all. Not an error.
    PriceUnavailable { reason: String },

    /// Commitment details.
    CommitmentsReady { commitments: CommitmentDetails },

    /// Commitment extraction failed.
    CommitmentsFailed { reason: String },
}

impl EnrichmentEvent {
    pub fn kind(&self) -> EnrichmentKind {
        match self {
            EnrichmentEvent::Progress { kind, .. } => *kind,
            EnrichmentEvent::PriceReady { .. } | EnrichmentEvent::PriceUnavailable { .. } => {
                EnrichmentKind::Price
            }
            EnrichmentEvent::CommitmentsReady { .. } | EnrichmentEvent::CommitmentsFailed { .. } => {
                EnrichmentKind::Commitments
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EnrichmentEvent::Progress { .. })
    }
}

/// An event tagged with the session generation it was produced for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentUpdate {
    pub generation: u64,
    pub event: EnrichmentEvent,
}

/// Where one enrichment task stands, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Idle,
    Running {
        stage: Option<EnrichmentStage>,
    },
    Done,
    Unavailable {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

/// Spawn both enrichment tasks for `extraction`.
///
/// The returned stream ends once both tasks have sent their terminal event.
pub fn spawn_enrichment(
    provider: Arc<dyn InsightProvider>,
    extraction: &ExtractionResult,
    generation: u64,
) -> ReceiverStream<EnrichmentUpdate> {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(price_task(
        provider.clone(),
        extraction.clone(),
        Emitter {
            tx: tx.clone(),
            generation,
        },
    ));
    tokio::spawn(commitments_task(
        provider,
        extraction.clone(),
        Emitter { tx, generation },
    ));

    ReceiverStream::new(rx)
}

struct Emitter {
    tx: mpsc::Sender<EnrichmentUpdate>,
    generation: u64,
}

impl Emitter {
    async fn emit(&self, event: EnrichmentEvent) {
        // The receiver goes away when the session is discarded.
        if self
            .tx
            .send(EnrichmentUpdate {
                generation: self.generation,
                event,
            })
            .await
            .is_err()
        {
            debug!(generation = self.generation, "enrichment receiver dropped");
        }
    }

    async fn progress(&self, stage: EnrichmentStage) {
        self.emit(EnrichmentEvent::Progress {
            kind: EnrichmentKind::Price,
            stage,
        })
        .await;
    }
}

async fn price_task(
    provider: Arc<dyn InsightProvider>,
    extraction: ExtractionResult,
    out: Emitter,
) {
    out.progress(EnrichmentStage::Normalizing).await;
    let item = match provider
        .normalize_item(&extraction.vendor, &extraction.description, extraction.amount)
        .await
    {
        Ok(item) => item,
        Err(e) => {
            warn!(error = %e, vendor = %extraction.vendor, "item normalization failed");
            return out.emit(price_fallback(&extraction, e.to_string())).await;
        }
    };

    out.progress(EnrichmentStage::Searching).await;
    let quote = match provider
        .search_market_price(&item.item_name, &extraction.description, &extraction.vendor)
        .await
    {
        Ok(quote) => quote,
        Err(e) => {
            warn!(error = %e, item = %item.item_name, "market price search failed");
            return out.emit(price_fallback(&extraction, e.to_string())).await;
        }
    };

    out.progress(EnrichmentStage::Complete).await;
    let intelligence = PriceIntelligence::from_grounded(&item, quote, extraction.amount);
    out.emit(EnrichmentEvent::PriceReady { intelligence }).await;
}

/// Fall back to the estimate from the base extraction, if there is one.
fn price_fallback(extraction: &ExtractionResult, reason: String) -> EnrichmentEvent {
    match extraction.market_price_estimate {
        Some(estimate) if estimate > 0.0 => EnrichmentEvent::PriceReady {
            intelligence: PriceIntelligence::from_estimate(estimate, extraction.amount),
        },
        _ => EnrichmentEvent::PriceUnavailable { reason },
    }
}

async fn commitments_task(
    provider: Arc<dyn InsightProvider>,
    extraction: ExtractionResult,
    out: Emitter,
) {
    let event = match provider
        .extract_commitments(&extraction.vendor, &extraction.description, extraction.amount)
        .await
    {
        Ok(commitments) => EnrichmentEvent::CommitmentsReady { commitments },
        Err(e) => {
            warn!(error = %e, vendor = %extraction.vendor, "commitment extraction failed");
            EnrichmentEvent::CommitmentsFailed {
                reason: e.to_string(),
            }
        }
    };
    out.emit(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use spendguard_core::{
        MarketPriceQuote, NormalizedItem, PriceOrigin, PriceRange,
    };
    use spendguard_insight::ScriptedProvider;
    use std::time::{Duration, Instant};

    fn extraction(amount: f64, estimate: Option<f64>) -> ExtractionResult {
        ExtractionResult {
            vendor: "OfficeMax".into(),
            amount,
            date: "2024-03-01".into(),
            description: "Ergonomic chair".into(),
            category: "Furniture".into(),
            confidence: 90,
            suggested_gl_code: "6150".into(),
            market_price_estimate: estimate,
            is_subscription: None,
            flags: Vec::new(),
        }
    }

    fn item() -> NormalizedItem {
        NormalizedItem {
            normalized_id: "office-chair".into(),
            item_name: "Office chair".into(),
            confidence: 80,
        }
    }

    async fn collect(stream: ReceiverStream<EnrichmentUpdate>) -> Vec<EnrichmentEvent> {
        stream.map(|u| u.event).collect().await
    }

    fn terminal(events: &[EnrichmentEvent], kind: EnrichmentKind) -> Vec<&EnrichmentEvent> {
        events
            .iter()
            .filter(|e| e.kind() == kind && e.is_terminal())
            .collect()
    }

    #[tokio::test]
    async fn test_grounded_price_stages_in_order() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_normalized_item(Some(item()))
                .with_market_quote(Some(MarketPriceQuote {
                    average_price: 300.0,
                    price_range: PriceRange { min: 250.0, max: 350.0 },
                    confidence: 75,
                    sources: Vec::new(),
                    reasoning: String::new(),
                }))
                .with_commitments(Some(CommitmentDetails::default())),
        );

        let events = collect(spawn_enrichment(provider, &extraction(400.0, None), 1)).await;

        let stages: Vec<EnrichmentStage> = events
            .iter()
            .filter_map(|e| match e {
                EnrichmentEvent::Progress { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                EnrichmentStage::Normalizing,
                EnrichmentStage::Searching,
                EnrichmentStage::Complete
            ]
        );

        let price = terminal(&events, EnrichmentKind::Price);
        assert_eq!(price.len(), 1);
        match price[0] {
            EnrichmentEvent::PriceReady { intelligence } => {
                assert_eq!(intelligence.origin, PriceOrigin::GroundedSearch);
                assert_eq!(intelligence.savings_opportunity, Some(100.0));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(terminal(&events, EnrichmentKind::Commitments).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_search_falls_back_to_estimate() {
        let provider = Arc::new(ScriptedProvider::new().with_normalized_item(Some(item())));

        let events = collect(spawn_enrichment(provider, &extraction(400.0, Some(250.0)), 1)).await;

        match terminal(&events, EnrichmentKind::Price)[0] {
            EnrichmentEvent::PriceReady { intelligence } => {
                assert_eq!(intelligence.origin, PriceOrigin::ExtractionEstimate);
                assert_eq!(intelligence.state_average, 250.0);
                assert_eq!(intelligence.savings_opportunity, Some(150.0));
            }
            other => panic!("unexpected event {other:?}"),
        }
        // Commitments were not scripted.
        assert!(matches!(
            terminal(&events, EnrichmentKind::Commitments)[0],
            EnrichmentEvent::CommitmentsFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_no_estimate_means_unavailable() {
        let provider = Arc::new(ScriptedProvider::new());

        let events = collect(spawn_enrichment(provider, &extraction(400.0, None), 1)).await;

        assert!(matches!(
            terminal(&events, EnrichmentKind::Price)[0],
            EnrichmentEvent::PriceUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn test_slow_price_search_does_not_delay_commitments() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .with_normalized_item(Some(item()))
                .with_price_delay(Duration::from_millis(300))
                .with_commitments(Some(CommitmentDetails::default())),
        );

        let started = Instant::now();
        let mut stream = spawn_enrichment(provider, &extraction(400.0, None), 7);

        let mut commitments_at = None;
        while let Some(update) = stream.next().await {
            assert_eq!(update.generation, 7);
            if update.event.kind() == EnrichmentKind::Commitments && update.event.is_terminal() {
                commitments_at = Some(started.elapsed());
                break;
            }
        }

        let elapsed = commitments_at.expect("commitments never finished");
        assert!(elapsed < Duration::from_millis(250), "took {elapsed:?}");
    }
}
