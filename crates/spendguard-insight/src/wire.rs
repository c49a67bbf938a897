//! Loosely typed provider replies and their conversion into core types.
//!
//! Model output is untrusted: numbers arrive as strings, tags arrive in any
//! case, optional fields go missing. Everything is normalized here.

use serde::Deserialize;
use serde_json::Value;
use spendguard_core::{
    CommitmentDetails, ExtractionResult, Flag, FlagType, MarketPriceQuote, NormalizedItem,
    PriceRange, PriceSource, Result, SpendGuardError,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawExtraction {
    vendor: Option<String>,
    #[serde(default)]
    amount: Option<Value>,
    date: Option<String>,
    description: Option<String>,
    category: Option<String>,
    #[serde(default)]
    confidence: Option<Value>,
    suggested_gl_code: Option<String>,
    #[serde(default)]
    market_price_estimate: Option<Value>,
    is_subscription: Option<bool>,
    #[serde(default)]
    flags: Vec<RawFlag>,
}

#[derive(Debug, Deserialize)]
struct RawFlag {
    #[serde(rename = "type", default)]
    flag_type: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    context: Option<String>,
}

impl RawExtraction {
    pub(crate) fn into_result(self) -> Result<ExtractionResult> {
        let vendor = non_empty(self.vendor).ok_or_else(|| {
            SpendGuardError::Provider("extraction reply has no vendor".to_string())
        })?;

        let flags = self
            .flags
            .into_iter()
            .filter(|f| !f.flag_type.trim().is_empty() || !f.reason.trim().is_empty())
            .map(|f| Flag {
                flag_type: FlagType::from_tag(&f.flag_type),
                reason: f.reason.trim().to_string(),
                context: non_empty(f.context),
            })
            .collect();

        Ok(ExtractionResult {
            vendor,
            amount: ExtractionResult::sanitize_amount(self.amount.as_ref().and_then(parse_number)),
            date: self.date.unwrap_or_default().trim().to_string(),
            description: self.description.unwrap_or_default().trim().to_string(),
            category: non_empty(self.category).unwrap_or_else(|| "Uncategorized".to_string()),
            confidence: ExtractionResult::sanitize_confidence(
                self.confidence.as_ref().and_then(parse_number),
            ),
            suggested_gl_code: self.suggested_gl_code.unwrap_or_default().trim().to_string(),
            market_price_estimate: self
                .market_price_estimate
                .as_ref()
                .and_then(parse_number)
                .filter(|p| *p > 0.0),
            is_subscription: self.is_subscription,
            flags,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawNormalizedItem {
    normalized_id: Option<String>,
    item_name: Option<String>,
    #[serde(default)]
    confidence: Option<Value>,
}

impl RawNormalizedItem {
    pub(crate) fn into_item(self) -> Result<NormalizedItem> {
        let item_name = non_empty(self.item_name).ok_or_else(|| {
            SpendGuardError::Provider("normalization reply has no item name".to_string())
        })?;
        let normalized_id = non_empty(self.normalized_id).unwrap_or_else(|| slug(&item_name));

        Ok(NormalizedItem {
            normalized_id,
            item_name,
            confidence: ExtractionResult::sanitize_confidence(
                self.confidence.as_ref().and_then(parse_number),
            ),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawMarketQuote {
    #[serde(default)]
    average_price: Option<Value>,
    #[serde(default)]
    price_range: Option<RawRange>,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default)]
    sources: Vec<RawSource>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRange {
    #[serde(default)]
    min: Option<Value>,
    #[serde(default)]
    max: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawSource {
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "uri")]
    url: Option<String>,
}

impl RawSource {
    pub(crate) fn new(title: Option<String>, url: Option<String>) -> Self {
        Self { title, url }
    }
}

impl RawMarketQuote {
    /// `fallback_sources` (grounding citations) are used when the reply cites none.
    pub(crate) fn into_quote(self, fallback_sources: Vec<RawSource>) -> Result<MarketPriceQuote> {
        let average_price = self
            .average_price
            .as_ref()
            .and_then(parse_number)
            .filter(|p| *p > 0.0)
            .ok_or_else(|| {
                SpendGuardError::Provider("market search reply has no average price".to_string())
            })?;

        let (min, max) = match self.price_range {
            Some(range) => (
                range.min.as_ref().and_then(parse_number).unwrap_or(average_price),
                range.max.as_ref().and_then(parse_number).unwrap_or(average_price),
            ),
            None => (average_price, average_price),
        };

        let raw_sources = if self.sources.is_empty() {
            fallback_sources
        } else {
            self.sources
        };
        let sources = raw_sources
            .into_iter()
            .filter_map(|s| {
                let url = non_empty(s.url)?;
                Some(PriceSource {
                    title: non_empty(s.title).unwrap_or_else(|| url.clone()),
                    url,
                })
            })
            .collect();

        Ok(MarketPriceQuote {
            average_price,
            price_range: PriceRange {
                min: min.min(max),
                max: max.max(min),
            },
            confidence: ExtractionResult::sanitize_confidence(
                self.confidence.as_ref().and_then(parse_number),
            ),
            sources,
            reasoning: self.reasoning.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawCommitments {
    #[serde(default)]
    is_recurring: bool,
    renewal_date: Option<String>,
    cancellation_deadline: Option<String>,
    escalation_clause: Option<String>,
}

impl RawCommitments {
    pub(crate) fn into_details(self) -> CommitmentDetails {
        if !self.is_recurring {
            return CommitmentDetails::default();
        }
        CommitmentDetails {
            is_recurring: true,
            renewal_date: non_empty(self.renewal_date),
            cancellation_deadline: non_empty(self.cancellation_deadline),
            escalation_clause: non_empty(self.escalation_clause),
        }
    }
}

/// Accept `12.5`, `"12.50"`, `"$1,234.50"` and `"USD 40"`.
pub(crate) fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    }
    .filter(|n| n.is_finite())
}

/// Pull the JSON object out of a free-text reply (markdown fences, chatter).
pub(crate) fn extract_json(text: &str) -> Result<&str> {
    let start = text.find('{');
    let end = text.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if end > start => Ok(&text[start..=end]),
        _ => Err(SpendGuardError::Provider(
            "reply does not contain a JSON object".to_string(),
        )),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}
