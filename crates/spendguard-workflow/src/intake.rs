//! Receipt intake: capture, extraction, enrichment, duplicate gate, submission.
//!
//! An [`IntakeSession`] holds one receipt until it becomes a record. Every
//! analysis run bumps the session generation; enrichment updates carry the
//! generation they were started for and are dropped once it is stale.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use spendguard_core::{
    find_duplicates, CommitmentDetails, DuplicateMatch, ExtractionResult, Flag, FlagType,
    NewRecord, PriceIntelligence, PurchaseRecord, ReceiptImage, RecordId, Result,
    SpendGuardError, Submitter,
};
use spendguard_insight::InsightProvider;
use spendguard_store::{RecordCache, RecordQuery, RecordStore};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::enrichment::{
    spawn_enrichment, EnrichmentEvent, EnrichmentKind, EnrichmentUpdate, TaskStatus,
};

/// Intake session shared between request handlers and enrichment tasks.
pub type SharedSession = Arc<RwLock<IntakeSession>>;

/// Lifecycle of an intake session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IntakeState {
    /// Waiting for the provider's extraction.
    Analyzing,
    /// Extraction failed; retry or retake.
    AnalysisFailed { reason: String },
    /// Extraction staged, awaiting user confirmation.
    Staged,
    /// Record created.
    Submitted { record_id: RecordId },
    /// Abandoned by the user.
    Discarded,
}

impl IntakeState {
    /// Submitted or discarded; no further changes.
    pub fn is_closed(&self) -> bool {
        matches!(self, IntakeState::Submitted { .. } | IntakeState::Discarded)
    }
}

/// How a submission treats duplicate matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Pause on duplicate matches.
    #[default]
    Normal,
    /// Skip the duplicate check.
    Force,
}

/// Result of a submission attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Possible duplicates found; nothing was created.
    NeedsConfirmation { matches: Vec<DuplicateMatch> },
    /// Record created. `local_only` is set when it was created in sandbox mode.
    Created {
        record: PurchaseRecord,
        local_only: bool,
    },
}

/// Serializable view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeView {
    pub id: Uuid,
    pub generation: u64,
    #[serde(flatten)]
    pub state: IntakeState,
    pub mime_type: String,
    pub extraction: Option<ExtractionResult>,
    pub price_intelligence: Option<PriceIntelligence>,
    pub commitments: Option<CommitmentDetails>,
    pub price_status: TaskStatus,
    pub commitments_status: TaskStatus,
    pub duplicates: Vec<DuplicateMatch>,
    pub started_at: DateTime<Utc>,
}

/// One receipt on its way to becoming a record.
pub struct IntakeSession {
    /// Unique ID for this session.
    pub id: Uuid,

    /// Who is submitting.
    pub submitter: Submitter,

    /// When the session started.
    pub started_at: DateTime<Utc>,

    image: ReceiptImage,
    generation: u64,
    state: IntakeState,
    extraction: Option<ExtractionResult>,
    price: Option<PriceIntelligence>,
    commitments: Option<CommitmentDetails>,
    price_status: TaskStatus,
    commitments_status: TaskStatus,
    duplicates: Vec<DuplicateMatch>,

    /// Views pushed after every change.
    updates: broadcast::Sender<IntakeView>,
}

impl IntakeSession {
    pub fn new(submitter: Submitter, image: ReceiptImage) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            id: Uuid::new_v4(),
            submitter,
            started_at: Utc::now(),
            image,
            generation: 0,
            state: IntakeState::Analyzing,
            extraction: None,
            price: None,
            commitments: None,
            price_status: TaskStatus::Idle,
            commitments_status: TaskStatus::Idle,
            duplicates: Vec::new(),
            updates,
        }
    }

    /// True once the session is older than `ttl`.
    pub fn is_expired(&self, ttl: std::time::Duration) -> bool {
        Utc::now()
            .signed_duration_since(self.started_at)
            .to_std()
            .map_or(false, |age| age > ttl)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> &IntakeState {
        &self.state
    }

    /// The staged extraction, including flags appended during enrichment.
    pub fn extraction(&self) -> Option<&ExtractionResult> {
        self.extraction.as_ref()
    }

    pub fn price_intelligence(&self) -> Option<&PriceIntelligence> {
        self.price.as_ref()
    }

    pub fn commitments(&self) -> Option<&CommitmentDetails> {
        self.commitments.as_ref()
    }

    pub fn image(&self) -> &ReceiptImage {
        &self.image
    }

    /// Duplicate matches found by the last check.
    pub fn duplicates(&self) -> &[DuplicateMatch] {
        &self.duplicates
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IntakeView> {
        self.updates.subscribe()
    }

    pub fn view(&self) -> IntakeView {
        IntakeView {
            id: self.id,
            generation: self.generation,
            state: self.state.clone(),
            mime_type: self.image.mime_type().to_string(),
            extraction: self.extraction.clone(),
            price_intelligence: self.price.clone(),
            commitments: self.commitments.clone(),
            price_status: self.price_status.clone(),
            commitments_status: self.commitments_status.clone(),
            duplicates: self.duplicates.clone(),
            started_at: self.started_at,
        }
    }

    fn notify(&self) {
        // No listeners is fine.
        let _ = self.updates.send(self.view());
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.is_closed() {
            return Err(SpendGuardError::Validation(format!(
                "Intake session {} is closed",
                self.id
            )));
        }
        Ok(())
    }

    /// Start a new analysis run, invalidating anything still in flight.
    pub fn begin_analysis(&mut self) -> Result<(u64, ReceiptImage)> {
        self.ensure_open()?;
        self.generation += 1;
        self.state = IntakeState::Analyzing;
        self.extraction = None;
        self.price = None;
        self.commitments = None;
        self.price_status = TaskStatus::Idle;
        self.commitments_status = TaskStatus::Idle;
        self.duplicates.clear();
        self.notify();
        Ok((self.generation, self.image.clone()))
    }

    /// Record the outcome of analysis run `generation`. Returns false if stale.
    pub fn finish_analysis(&mut self, generation: u64, result: Result<ExtractionResult>) -> bool {
        if generation != self.generation || self.state != IntakeState::Analyzing {
            debug!(session_id = %self.id, generation, "dropping stale analysis result");
            return false;
        }

        match result {
            Ok(extraction) => {
                self.extraction = Some(extraction);
                self.state = IntakeState::Staged;
                self.price_status = TaskStatus::Running { stage: None };
                self.commitments_status = TaskStatus::Running { stage: None };
            }
            Err(e) => {
                self.state = IntakeState::AnalysisFailed {
                    reason: e.to_string(),
                };
            }
        }
        self.notify();
        true
    }

    /// Apply an enrichment update. Returns false if it was dropped as stale.
    pub fn apply(&mut self, update: EnrichmentUpdate) -> bool {
        if update.generation != self.generation || self.state != IntakeState::Staged {
            debug!(
                session_id = %self.id,
                update_generation = update.generation,
                generation = self.generation,
                "dropping stale enrichment update"
            );
            return false;
        }

        match update.event {
            EnrichmentEvent::Progress { kind, stage } => {
                let status = TaskStatus::Running { stage: Some(stage) };
                match kind {
                    EnrichmentKind::Price => self.price_status = status,
                    EnrichmentKind::Commitments => self.commitments_status = status,
                }
            }
            EnrichmentEvent::PriceReady { intelligence } => {
                if let Some(extraction) = self.extraction.as_mut() {
                    if extraction.check_grounded_deviation(&intelligence) {
                        info!(session_id = %self.id, "market deviation flag raised from grounded price");
                    }
                }
                self.price = Some(intelligence);
                self.price_status = TaskStatus::Done;
            }
            EnrichmentEvent::PriceUnavailable { reason } => {
                self.price = None;
                self.price_status = TaskStatus::Unavailable { reason };
            }
            EnrichmentEvent::CommitmentsReady { commitments } => {
                self.commitments = Some(commitments);
                self.commitments_status = TaskStatus::Done;
            }
            EnrichmentEvent::CommitmentsFailed { reason } => {
                self.commitments_status = TaskStatus::Failed { reason };
            }
        }
        self.notify();
        true
    }

    /// Replace the image. The caller starts a new analysis afterwards.
    pub fn retake(&mut self, image: ReceiptImage) -> Result<()> {
        self.ensure_open()?;
        self.image = image;
        Ok(())
    }

    /// Abandon the session. In-flight updates become stale.
    pub fn discard(&mut self) {
        if matches!(self.state, IntakeState::Submitted { .. }) {
            return;
        }
        self.generation += 1;
        self.state = IntakeState::Discarded;
        self.notify();
    }

    /// Score the staged extraction against `existing` and remember the matches.
    pub fn check_duplicates(&mut self, existing: &[PurchaseRecord]) -> Result<Vec<DuplicateMatch>> {
        let extraction = self.staged()?;
        let matches = find_duplicates(extraction, existing);
        self.duplicates = matches.clone();
        self.notify();
        Ok(matches)
    }

    fn staged(&self) -> Result<&ExtractionResult> {
        match (&self.state, &self.extraction) {
            (IntakeState::Staged, Some(extraction)) => Ok(extraction),
            (IntakeState::AnalysisFailed { reason }, _) => Err(SpendGuardError::Validation(
                format!("Receipt analysis failed ({reason}); retry or retake before submitting"),
            )),
            _ => Err(SpendGuardError::Validation(
                "Receipt is not ready for submission".to_string(),
            )),
        }
    }

    /// Build the record to create.
    ///
    /// A forced submission over known matches carries one DUPLICATE flag
    /// naming the matched records.
    pub fn build_record(&self, mode: SubmitMode) -> Result<NewRecord> {
        let mut extraction = self.staged()?.clone();

        if mode == SubmitMode::Force && !self.duplicates.is_empty() {
            let ids: Vec<&str> = self.duplicates.iter().map(|m| m.record.id.as_str()).collect();
            let top = &self.duplicates[0];
            extraction.append_flag(
                Flag::new(
                    FlagType::Duplicate,
                    format!("Submitted despite possible duplicate of {}", ids.join(", ")),
                )
                .with_context(format!("Score {}: {}", top.score, top.reasons.join(", "))),
            );
        }

        let mut record = NewRecord::from_extraction(extraction, self.submitter.clone());
        record.price_intelligence = self.price.clone();
        if let Some(commitments) = &self.commitments {
            if record.is_subscription.is_none() {
                record.is_subscription = Some(commitments.is_recurring);
            }
            record.commitments = Some(commitments.clone());
        }
        Ok(record)
    }

    fn mark_submitted(&mut self, record_id: RecordId) {
        self.generation += 1;
        self.state = IntakeState::Submitted { record_id };
        self.notify();
    }
}

/// Drives intake sessions against the provider, the store and the cache.
#[derive(Clone)]
pub struct IntakeOrchestrator {
    provider: Arc<dyn InsightProvider>,
    store: Arc<dyn RecordStore>,
    cache: Arc<RwLock<RecordCache>>,
}

impl IntakeOrchestrator {
    pub fn new(
        provider: Arc<dyn InsightProvider>,
        store: Arc<dyn RecordStore>,
        cache: Arc<RwLock<RecordCache>>,
    ) -> Self {
        Self {
            provider,
            store,
            cache,
        }
    }

    /// Open a session for an uploaded image. Nothing is analyzed yet.
    pub fn open(&self, submitter: Submitter, image: ReceiptImage) -> SharedSession {
        let session = IntakeSession::new(submitter, image);
        info!(session_id = %session.id, user_id = %session.submitter.user_id, "intake session opened");
        Arc::new(RwLock::new(session))
    }

    /// Ask the provider to read a receipt. Never creates a record.
    pub async fn process_receipt(&self, image: &ReceiptImage) -> Result<ExtractionResult> {
        debug!(provider = self.provider.name(), size = image.bytes().len(), "analyzing receipt");
        let mut extraction = self.provider.analyze_receipt(image).await?;

        if extraction.check_estimate_deviation() {
            info!(vendor = %extraction.vendor, "market deviation flag raised from estimate");
        }
        Ok(extraction)
    }

    /// Start both enrichment tasks for a staged extraction.
    pub fn enrich_in_background(
        &self,
        extraction: &ExtractionResult,
        generation: u64,
    ) -> ReceiverStream<EnrichmentUpdate> {
        spawn_enrichment(self.provider.clone(), extraction, generation)
    }

    /// Run (or re-run) analysis for a session and start enrichment on success.
    pub async fn analyze(&self, session: &SharedSession) -> Result<ExtractionResult> {
        let (generation, image) = session.write().await.begin_analysis()?;
        let result = self.process_receipt(&image).await;

        let mut guard = session.write().await;
        if !guard.finish_analysis(generation, result.clone()) {
            return Err(SpendGuardError::Validation(
                "Receipt was replaced while it was being analyzed".to_string(),
            ));
        }

        match &result {
            Ok(extraction) => {
                info!(session_id = %guard.id, generation, vendor = %extraction.vendor, "receipt staged");
                let updates = self.enrich_in_background(extraction, generation);
                tokio::spawn(apply_updates(session.clone(), updates));
            }
            Err(e) => warn!(session_id = %guard.id, error = %e, "receipt analysis failed"),
        }
        result
    }

    /// Swap in a new image and analyze it.
    pub async fn retake(
        &self,
        session: &SharedSession,
        image: ReceiptImage,
    ) -> Result<ExtractionResult> {
        session.write().await.retake(image)?;
        self.analyze(session).await
    }

    /// Turn a staged session into a record.
    pub async fn submit(&self, session: &SharedSession, mode: SubmitMode) -> Result<SubmitOutcome> {
        let mut guard = session.write().await;

        if mode == SubmitMode::Normal {
            let existing = self
                .cache
                .read()
                .await
                .records(&RecordQuery::organization(guard.submitter.organization.clone()));
            let matches = guard.check_duplicates(&existing)?;
            if !matches.is_empty() {
                info!(session_id = %guard.id, matches = matches.len(), "submission paused on duplicates");
                return Ok(SubmitOutcome::NeedsConfirmation { matches });
            }
        }

        let mut new_record = guard.build_record(mode)?;

        if self.cache.read().await.is_sandbox() {
            let record = new_record.into_record(RecordId::local(), Utc::now());
            self.cache.write().await.insert_local(record.clone());
            guard.mark_submitted(record.id.clone());
            info!(record_id = %record.id, "record created locally in sandbox mode");
            return Ok(SubmitOutcome::Created {
                record,
                local_only: true,
            });
        }

        new_record.file_ref = self.upload_image(guard.image(), &guard.submitter).await;

        match self.store.create_record(new_record).await {
            Ok(record) => {
                self.cache.write().await.insert_confirmed(record.clone());
                guard.mark_submitted(record.id.clone());
                info!(record_id = %record.id, status = %record.status(), "record created");
                Ok(SubmitOutcome::Created {
                    record,
                    local_only: false,
                })
            }
            Err(e) => {
                if matches!(e, SpendGuardError::Persistence(_)) {
                    self.cache.write().await.enter_sandbox(e.to_string());
                }
                warn!(session_id = %guard.id, error = %e, "record creation failed");
                Err(e)
            }
        }
    }

    /// Upload the receipt image. A failure only loses the attachment.
    async fn upload_image(&self, image: &ReceiptImage, submitter: &Submitter) -> Option<String> {
        let path = format!(
            "receipts/{}/{}.{}",
            submitter.organization,
            image.content_hash(),
            image.extension()
        );
        match self.store.upload_binary(image.bytes().to_vec(), &path).await {
            Ok(file_ref) => Some(file_ref),
            Err(e) => {
                warn!(error = %e, %path, "receipt upload failed; creating record without attachment");
                None
            }
        }
    }
}

async fn apply_updates(session: SharedSession, mut updates: ReceiverStream<EnrichmentUpdate>) {
    while let Some(update) = updates.next().await {
        let mut guard = session.write().await;
        guard.apply(update);
        if guard.state().is_closed() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::EnrichmentStage;
    use spendguard_core::{
        MarketPriceQuote, NormalizedItem, PriceOrigin, PriceRange, PriceSource, RecordStatus,
    };
    use spendguard_insight::ScriptedProvider;
    use spendguard_store::InMemoryRecordStore;
    use std::time::Duration;

    fn submitter() -> Submitter {
        Submitter {
            user_id: "u1".into(),
            display_name: "Ada".into(),
            organization: "acme".into(),
        }
    }

    fn image() -> ReceiptImage {
        ReceiptImage::new(vec![0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg").unwrap()
    }

    fn extraction(vendor: &str, amount: f64, date: &str) -> ExtractionResult {
        ExtractionResult {
            vendor: vendor.into(),
            amount,
            date: date.into(),
            description: "Printer paper".into(),
            category: "Office Supplies".into(),
            confidence: 92,
            suggested_gl_code: "6100".into(),
            market_price_estimate: None,
            is_subscription: None,
            flags: Vec::new(),
        }
    }

    struct Harness {
        orchestrator: IntakeOrchestrator,
        store: Arc<InMemoryRecordStore>,
        cache: Arc<RwLock<RecordCache>>,
    }

    fn harness(provider: ScriptedProvider) -> Harness {
        let store = Arc::new(InMemoryRecordStore::new());
        let cache = Arc::new(RwLock::new(RecordCache::new()));
        let orchestrator = IntakeOrchestrator::new(Arc::new(provider), store.clone(), cache.clone());
        Harness {
            orchestrator,
            store,
            cache,
        }
    }

    async fn wait_for<F>(session: &SharedSession, done: F)
    where
        F: Fn(&IntakeSession) -> bool,
    {
        for _ in 0..100 {
            if done(&*session.read().await) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session never reached the expected state");
    }

    fn enrichment_settled(s: &IntakeSession) -> bool {
        let settled = |t: &TaskStatus| !matches!(t, TaskStatus::Idle | TaskStatus::Running { .. });
        settled(&s.price_status) && settled(&s.commitments_status)
    }

    #[tokio::test]
    async fn test_estimate_deviation_flag_on_extraction() {
        let mut result = extraction("OfficeMax", 400.0, "2024-03-01");
        result.market_price_estimate = Some(300.0);
        let h = harness(ScriptedProvider::new().with_extraction(Some(result)));

        let staged = h.orchestrator.process_receipt(&image()).await.unwrap();
        assert!(staged.has_flag(FlagType::MarketDeviation));
    }

    #[tokio::test]
    async fn test_analysis_failure_is_retryable_and_blocks_submit() {
        let h = harness(
            ScriptedProvider::new()
                .with_extraction(None)
                .then_extraction(Some(extraction("Staples", 45.0, "2024-01-10"))),
        );
        let session = h.orchestrator.open(submitter(), image());

        assert!(h.orchestrator.analyze(&session).await.is_err());
        assert!(matches!(
            session.read().await.state(),
            IntakeState::AnalysisFailed { .. }
        ));
        let err = h.orchestrator.submit(&session, SubmitMode::Force).await.unwrap_err();
        assert!(matches!(err, SpendGuardError::Validation(_)));

        let staged = h.orchestrator.analyze(&session).await.unwrap();
        assert_eq!(staged.vendor, "Staples");
        assert_eq!(session.read().await.state(), &IntakeState::Staged);
    }

    #[tokio::test]
    async fn test_fallback_price_lands_on_record() {
        let mut result = extraction("OfficeMax", 400.0, "2024-03-01");
        result.market_price_estimate = Some(250.0);
        let h = harness(
            ScriptedProvider::new()
                .with_extraction(Some(result))
                .with_normalized_item(Some(NormalizedItem {
                    normalized_id: "chair".into(),
                    item_name: "Chair".into(),
                    confidence: 80,
                })),
        );
        let session = h.orchestrator.open(submitter(), image());
        h.orchestrator.analyze(&session).await.unwrap();
        wait_for(&session, enrichment_settled).await;

        let outcome = h.orchestrator.submit(&session, SubmitMode::Normal).await.unwrap();
        let SubmitOutcome::Created { record, local_only } = outcome else {
            panic!("expected a created record");
        };
        assert!(!local_only);
        let intel = record.price_intelligence.as_ref().unwrap();
        assert_eq!(intel.origin, PriceOrigin::ExtractionEstimate);
        assert_eq!(intel.state_average, 250.0);
        assert_eq!(intel.savings_opportunity, Some(150.0));
        // 400 vs 250 is already over the 20% estimate threshold.
        assert_eq!(record.status(), RecordStatus::Flagged);
    }

    #[tokio::test]
    async fn test_grounded_deviation_flag_appended_once() {
        let h = harness(
            ScriptedProvider::new()
                .with_extraction(Some(extraction("OfficeMax", 400.0, "2024-03-01")))
                .with_normalized_item(Some(NormalizedItem {
                    normalized_id: "chair".into(),
                    item_name: "Chair".into(),
                    confidence: 80,
                }))
                .with_market_quote(Some(MarketPriceQuote {
                    average_price: 300.0,
                    price_range: PriceRange { min: 280.0, max: 320.0 },
                    confidence: 70,
                    sources: vec![PriceSource {
                        title: "Shop".into(),
                        url: "https://shop.example".into(),
                    }],
                    reasoning: String::new(),
                }))
                .with_commitments(Some(CommitmentDetails::default())),
        );
        let session = h.orchestrator.open(submitter(), image());
        h.orchestrator.analyze(&session).await.unwrap();
        wait_for(&session, enrichment_settled).await;

        let guard = session.read().await;
        let flags = &guard.extraction().unwrap().flags;
        assert_eq!(
            flags.iter().filter(|f| f.flag_type == FlagType::MarketDeviation).count(),
            1
        );
        assert_eq!(guard.price_intelligence().unwrap().savings_opportunity, Some(100.0));
    }

    #[tokio::test]
    async fn test_duplicate_gate_and_force_submit() {
        let h = harness(
            ScriptedProvider::new().with_extraction(Some(extraction("Staples", 100.5, "2024-01-15"))),
        );

        let prior = NewRecord::from_extraction(extraction("Staples", 100.0, "2024-01-10"), submitter());
        let prior = h.store.create_record(prior).await.unwrap();
        h.cache.write().await.insert_confirmed(prior.clone());

        let session = h.orchestrator.open(submitter(), image());
        h.orchestrator.analyze(&session).await.unwrap();

        let outcome = h.orchestrator.submit(&session, SubmitMode::Normal).await.unwrap();
        let SubmitOutcome::NeedsConfirmation { matches } = outcome else {
            panic!("expected duplicate confirmation");
        };
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].score, 100);
        assert_eq!(h.store.list_records(&RecordQuery::all()).await.unwrap().len(), 1);

        let outcome = h.orchestrator.submit(&session, SubmitMode::Force).await.unwrap();
        let SubmitOutcome::Created { record, .. } = outcome else {
            panic!("expected a created record");
        };
        let duplicate_flags: Vec<&Flag> = record
            .flags
            .iter()
            .filter(|f| f.flag_type == FlagType::Duplicate)
            .collect();
        assert_eq!(duplicate_flags.len(), 1);
        assert!(duplicate_flags[0].reason.contains(prior.id.as_str()));
        assert_eq!(record.status(), RecordStatus::Flagged);
        let file_ref = record.file_ref.as_deref().unwrap();
        assert!(file_ref.starts_with("memory://receipts/acme/"));
        let path = file_ref.trim_start_matches("memory://");
        assert_eq!(h.store.blob(path).await, Some(image().bytes().to_vec()));
    }

    #[tokio::test]
    async fn test_retake_replaces_image_and_reanalyzes() {
        let provider = ScriptedProvider::new()
            .with_extraction(Some(extraction("Staples", 10.0, "2024-01-10")))
            .then_extraction(Some(extraction("Office Depot", 12.0, "2024-01-11")));
        let h = harness(provider);

        let session = h.orchestrator.open(submitter(), image());
        h.orchestrator.analyze(&session).await.unwrap();
        let before = session.read().await.generation();

        let png = ReceiptImage::new(vec![0x89, b'P', b'N', b'G'], "image/png").unwrap();
        let result = h.orchestrator.retake(&session, png).await.unwrap();
        assert_eq!(result.vendor, "Office Depot");

        let guard = session.read().await;
        assert!(guard.generation() > before);
        assert_eq!(guard.image().mime_type(), "image/png");
        assert_eq!(guard.state(), &IntakeState::Staged);
    }

    #[tokio::test]
    async fn test_stale_updates_dropped_after_retake() {
        let mut session = IntakeSession::new(submitter(), image());
        let (first, _) = session.begin_analysis().unwrap();
        assert!(session.finish_analysis(first, Ok(extraction("Staples", 10.0, "2024-01-10"))));

        session.retake(image()).unwrap();
        let (second, _) = session.begin_analysis().unwrap();
        assert!(second > first);
        assert!(session.finish_analysis(second, Ok(extraction("Costco", 20.0, "2024-01-11"))));

        let stale = EnrichmentUpdate {
            generation: first,
            event: EnrichmentEvent::PriceReady {
                intelligence: PriceIntelligence::from_estimate(5.0, 10.0),
            },
        };
        assert!(!session.apply(stale));
        assert!(session.price_intelligence().is_none());

        let fresh = EnrichmentUpdate {
            generation: second,
            event: EnrichmentEvent::Progress {
                kind: EnrichmentKind::Price,
                stage: EnrichmentStage::Searching,
            },
        };
        assert!(session.apply(fresh));
    }

    #[tokio::test]
    async fn test_stale_analysis_result_dropped() {
        let mut session = IntakeSession::new(submitter(), image());
        let (first, _) = session.begin_analysis().unwrap();
        let (second, _) = session.begin_analysis().unwrap();

        assert!(!session.finish_analysis(first, Ok(extraction("Old", 1.0, "2024-01-01"))));
        assert!(session.finish_analysis(second, Ok(extraction("New", 2.0, "2024-01-02"))));
        assert_eq!(session.extraction().unwrap().vendor, "New");
    }

    #[tokio::test]
    async fn test_discard_closes_session() {
        let mut session = IntakeSession::new(submitter(), image());
        let (generation, _) = session.begin_analysis().unwrap();
        session.discard();

        assert!(!session.finish_analysis(generation, Ok(extraction("Staples", 1.0, "2024-01-01"))));
        assert!(session.begin_analysis().is_err());
        assert_eq!(session.state(), &IntakeState::Discarded);
    }

    #[tokio::test]
    async fn test_create_failure_enters_sandbox_then_creates_locally() {
        let h = harness(
            ScriptedProvider::new().with_extraction(Some(extraction("Staples", 45.0, "2024-01-10"))),
        );
        let session = h.orchestrator.open(submitter(), image());
        h.orchestrator.analyze(&session).await.unwrap();

        h.store.set_offline(true);
        let err = h.orchestrator.submit(&session, SubmitMode::Normal).await.unwrap_err();
        assert!(matches!(err, SpendGuardError::Persistence(_)));
        assert!(h.cache.read().await.is_sandbox());

        let outcome = h.orchestrator.submit(&session, SubmitMode::Normal).await.unwrap();
        let SubmitOutcome::Created { record, local_only } = outcome else {
            panic!("expected a created record");
        };
        assert!(local_only);
        assert!(record.id.is_local());
        assert!(h.store.list_records(&RecordQuery::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_updates_are_broadcast() {
        let h = harness(
            ScriptedProvider::new().with_extraction(Some(extraction("Staples", 45.0, "2024-01-10"))),
        );
        let session = h.orchestrator.open(submitter(), image());
        let mut updates = session.read().await.subscribe();

        h.orchestrator.analyze(&session).await.unwrap();

        let first = updates.recv().await.unwrap();
        assert_eq!(first.state, IntakeState::Analyzing);
        let second = updates.recv().await.unwrap();
        assert_eq!(second.state, IntakeState::Staged);
        assert_eq!(second.extraction.unwrap().vendor, "Staples");
    }
}
