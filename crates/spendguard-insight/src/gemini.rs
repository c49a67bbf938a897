//! HTTP adapter for the Gemini `generateContent` API.
//!
//! Structured calls ask for `application/json` with a response schema. The
//! market search cannot (the search tool and a schema are mutually
//! exclusive), so its JSON is dug out of the text reply instead.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use spendguard_core::{
    CommitmentDetails, ExtractionResult, MarketPriceQuote, NormalizedItem, ReceiptImage, Result,
    SpendGuardError,
};
use tracing::{debug, warn};

use crate::prompts;
use crate::provider::InsightProvider;
use crate::wire::{
    extract_json, RawCommitments, RawExtraction, RawMarketQuote, RawNormalizedItem, RawSource,
};

/// Public API root.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Connection settings for [`GeminiProvider`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 1,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Gemini-backed [`InsightProvider`].
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    config: GeminiConfig,
}

/// Text plus grounding citations from one reply.
struct Reply {
    text: String,
    sources: Vec<RawSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<WebChunk>,
}

#[derive(Debug, Deserialize)]
struct WebChunk {
    uri: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(SpendGuardError::Config(
                "provider.api_key is required for the gemini provider".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&config.api_key).map_err(|e| {
                SpendGuardError::Config(format!("invalid API key header value: {e}"))
            })?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| SpendGuardError::Provider(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    /// POST a request, retrying transient failures.
    async fn generate(&self, body: &Value) -> Result<Reply> {
        let url = self.endpoint();
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                warn!(attempt, "retrying generateContent after transient error");
                tokio::time::sleep(self.config.retry_delay).await;
            }

            let response = self
                .client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(|e| SpendGuardError::Provider(format!("HTTP request failed: {e}")))?;

            let status = response.status();
            debug!(status = %status, attempt, model = %self.config.model, "generateContent response");

            if status.is_success() {
                let parsed: GenerateResponse = response.json().await.map_err(|e| {
                    SpendGuardError::Provider(format!("failed to parse API response: {e}"))
                })?;
                return Reply::from_response(parsed);
            }

            let text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiErrorResponse>(&text) {
                Ok(err) => format!("Gemini API error ({}): {}", err.error.status, err.error.message),
                Err(_) => format!("API returned {status}: {text}"),
            };

            if is_transient(status) && attempt < self.config.max_retries {
                warn!(status = %status, "transient error, will retry");
                last_error = Some(SpendGuardError::Provider(message));
                continue;
            }
            return Err(SpendGuardError::Provider(message));
        }

        Err(last_error.unwrap_or_else(|| {
            SpendGuardError::Provider("generateContent failed after retries".to_string())
        }))
    }

    async fn generate_json<T: DeserializeOwned>(&self, parts: Vec<Value>, schema: Value) -> Result<T> {
        let body = json!({
            "contents": [{"role": "user", "parts": parts}],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema,
            }
        });
        let reply = self.generate(&body).await?;
        parse_reply(&reply.text)
    }

    async fn generate_text(&self, prompt: String) -> Result<String> {
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}]
        });
        let reply = self.generate(&body).await?;
        let text = reply.text.trim();
        if text.is_empty() {
            return Err(SpendGuardError::Provider("empty text reply".to_string()));
        }
        Ok(text.to_string())
    }
}

impl Reply {
    fn from_response(response: GenerateResponse) -> Result<Self> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| SpendGuardError::Provider("reply has no candidates".to_string()))?;

        let text = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let sources = candidate
            .grounding_metadata
            .map(|m| {
                m.grounding_chunks
                    .into_iter()
                    .filter_map(|c| c.web)
                    .map(|w| RawSource::new(w.title, w.uri))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self { text, sources })
    }
}

fn parse_reply<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(extract_json(text)?)
        .map_err(|e| SpendGuardError::Provider(format!("malformed structured reply: {e}")))
}

/// Returns true for status codes worth one more attempt.
fn is_transient(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::SERVICE_UNAVAILABLE
    )
}

#[async_trait]
impl InsightProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn analyze_receipt(&self, image: &ReceiptImage) -> Result<ExtractionResult> {
        let data = base64::engine::general_purpose::STANDARD.encode(image.bytes());
        let parts = vec![
            json!({"inlineData": {"mimeType": image.mime_type(), "data": data}}),
            json!({"text": prompts::receipt_analysis()}),
        ];
        let raw: RawExtraction = self.generate_json(parts, prompts::extraction_schema()).await?;
        raw.into_result()
    }

    async fn normalize_item(
        &self,
        vendor: &str,
        description: &str,
        amount: f64,
    ) -> Result<NormalizedItem> {
        let parts = vec![json!({"text": prompts::normalize_item(vendor, description, amount)})];
        let raw: RawNormalizedItem = self
            .generate_json(parts, prompts::normalized_item_schema())
            .await?;
        raw.into_item()
    }

    async fn search_market_price(
        &self,
        item_name: &str,
        description: &str,
        vendor: &str,
    ) -> Result<MarketPriceQuote> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": prompts::market_search(item_name, description, vendor)}]
            }],
            "tools": [{"google_search": {}}]
        });
        let reply = self.generate(&body).await?;
        let raw: RawMarketQuote = parse_reply(&reply.text)?;
        raw.into_quote(reply.sources)
    }

    async fn extract_commitments(
        &self,
        vendor: &str,
        description: &str,
        amount: f64,
    ) -> Result<CommitmentDetails> {
        let parts = vec![json!({"text": prompts::commitments(vendor, description, amount)})];
        let raw: RawCommitments = self.generate_json(parts, prompts::commitments_schema()).await?;
        Ok(raw.into_details())
    }

    async fn draft_rejection_email(
        &self,
        vendor: &str,
        amount: f64,
        reason: &str,
        recipient: &str,
    ) -> Result<String> {
        self.generate_text(prompts::rejection_email(vendor, amount, reason, recipient))
            .await
    }

    async fn generate_insight(&self, query: &str, data_summary: &str) -> Result<String> {
        self.generate_text(prompts::insight(query, data_summary)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ENDPOINT: &str = "/models/gemini-2.0-flash:generateContent";

    fn test_provider(base_url: &str) -> GeminiProvider {
        let mut config = GeminiConfig::new("test-key");
        config.base_url = base_url.to_string();
        config.retry_delay = Duration::from_millis(10);
        GeminiProvider::new(config).unwrap()
    }

    fn text_reply(text: &str) -> Value {
        json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let err = GeminiProvider::new(GeminiConfig::new("  ")).unwrap_err();
        assert!(matches!(err, SpendGuardError::Config(_)));
    }

    #[tokio::test]
    async fn test_analyze_receipt_sends_image_and_schema() {
        let server = MockServer::start().await;
        let extraction = json!({
            "vendor": "Staples",
            "amount": 45.5,
            "date": "2024-01-10",
            "description": "Printer paper",
            "category": "Office Supplies",
            "confidence": 91,
            "suggestedGlCode": "6100",
            "marketPriceEstimate": 40,
            "flags": []
        });

        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "generationConfig": {"responseMimeType": "application/json"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_reply(&extraction.to_string())))
            .expect(1)
            .mount(&server)
            .await;

        let image = ReceiptImage::new(vec![0xFF, 0xD8, 0xFF], "image/jpeg").unwrap();
        let result = test_provider(&server.uri()).analyze_receipt(&image).await.unwrap();

        assert_eq!(result.vendor, "Staples");
        assert_eq!(result.amount, 45.5);
        assert_eq!(result.market_price_estimate, Some(40.0));
    }

    #[tokio::test]
    async fn test_market_search_uses_grounding_sources() {
        let server = MockServer::start().await;
        let reply = json!({
            "candidates": [{
                "content": {"parts": [{"text": "```json\n{\"averagePrice\": 250, \"confidence\": 80, \"sources\": []}\n```"}]},
                "groundingMetadata": {"groundingChunks": [
                    {"web": {"uri": "https://shop.example/chair", "title": "Shop"}}
                ]}
            }]
        });

        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .and(body_partial_json(json!({"tools": [{"google_search": {}}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply))
            .mount(&server)
            .await;

        let quote = test_provider(&server.uri())
            .search_market_price("Office chair", "Ergonomic chair", "OfficeMax")
            .await
            .unwrap();

        assert_eq!(quote.average_price, 250.0);
        assert_eq!(quote.sources.len(), 1);
        assert_eq!(quote.sources[0].title, "Shop");
    }

    #[tokio::test]
    async fn test_retries_once_on_429() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"code": 429, "status": "RESOURCE_EXHAUSTED", "message": "quota"}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("Spend is flat.")))
            .mount(&server)
            .await;

        let answer = test_provider(&server.uri())
            .generate_insight("trend?", "Total: 10")
            .await
            .unwrap();
        assert_eq!(answer, "Spend is flat.");
    }

    #[tokio::test]
    async fn test_exhausted_retries_on_503() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(2)
            .mount(&server)
            .await;

        let err = test_provider(&server.uri())
            .generate_insight("trend?", "Total: 10")
            .await
            .unwrap_err();
        assert!(matches!(err, SpendGuardError::Provider(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_no_retry_on_400() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "status": "INVALID_ARGUMENT", "message": "bad image"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_provider(&server.uri())
            .draft_rejection_email("Staples", 10.0, "Duplicate", "ada@example.com")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("INVALID_ARGUMENT"));
    }

    #[tokio::test]
    async fn test_malformed_reply_is_provider_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("not json at all")))
            .mount(&server)
            .await;

        let err = test_provider(&server.uri())
            .extract_commitments("Adobe", "Creative Cloud", 54.99)
            .await
            .unwrap_err();
        assert!(matches!(err, SpendGuardError::Provider(_)));
    }
}
