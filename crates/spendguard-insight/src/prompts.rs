//! Prompt text and response schemas for the extraction service.

use serde_json::{json, Value};

/// Tags the extraction prompt asks the model to use for anomaly flags.
pub const FLAG_TAGS: &[&str] = &[
    "DUPLICATE",
    "MARKET_DEVIATION",
    "ZOMBIE_SPEND",
    "POLICY_VIOLATION",
    "UNUSUAL_VENDOR",
    "SPLIT_PURCHASE",
    "MISSING_INFO",
    "OTHER",
];

pub fn receipt_analysis() -> String {
    format!(
        "You are a procurement auditor. Read this receipt or invoice and extract the \
         vendor name, the total amount paid as a number, the transaction date as \
         YYYY-MM-DD, a one-sentence description of what was bought, a spend category, \
         your confidence (0-100), a suggested general-ledger code, an estimated fair \
         market price for the same goods, and whether the purchase is a subscription. \
         Raise flags for anything an auditor should look at, using only these types: {}. \
         If a field is unreadable, leave it empty rather than guessing.",
        FLAG_TAGS.join(", ")
    )
}

pub fn normalize_item(vendor: &str, description: &str, amount: f64) -> String {
    format!(
        "Identify the product behind this purchase so it can be price-compared.\n\
         Vendor: {vendor}\nDescription: {description}\nAmount: {amount:.2}\n\
         Return a stable lowercase hyphenated identifier, a generic item name a \
         shopper would search for, and your confidence (0-100)."
    )
}

pub fn market_search(item_name: &str, description: &str, vendor: &str) -> String {
    format!(
        "Search the web for the current fair market price of: {item_name}.\n\
         Context: bought from {vendor}, described as \"{description}\".\n\
         Reply with a single JSON object and nothing else, with the keys \
         averagePrice (number), priceRange ({{\"min\": number, \"max\": number}}), \
         confidence (0-100), sources (array of {{\"title\", \"url\"}}) and reasoning (string)."
    )
}

pub fn commitments(vendor: &str, description: &str, amount: f64) -> String {
    format!(
        "Decide whether this purchase creates a recurring obligation such as a \
         subscription, licence or service contract.\n\
         Vendor: {vendor}\nDescription: {description}\nAmount: {amount:.2}\n\
         If it does, give the renewal date and cancellation deadline as YYYY-MM-DD when \
         they can be inferred, and quote any price escalation clause."
    )
}

pub fn rejection_email(vendor: &str, amount: f64, reason: &str, recipient: &str) -> String {
    format!(
        "Write a short, professional email to {recipient} explaining that their \
         expense of ${amount:.2} at {vendor} was rejected.\nReason: {reason}\n\
         Be factual and polite, say what they can do next, and sign off as the \
         Finance team. Plain text only, no subject line."
    )
}

pub fn insight(query: &str, data_summary: &str) -> String {
    format!(
        "You are a spend analyst. Answer the question using only the data below. \
         Quote figures where they help and keep the answer under 200 words.\n\n\
         DATA:\n{data_summary}\n\nQUESTION: {query}"
    )
}

pub fn extraction_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "vendor": {"type": "STRING"},
            "amount": {"type": "NUMBER"},
            "date": {"type": "STRING"},
            "description": {"type": "STRING"},
            "category": {"type": "STRING"},
            "confidence": {"type": "NUMBER"},
            "suggestedGlCode": {"type": "STRING"},
            "marketPriceEstimate": {"type": "NUMBER"},
            "isSubscription": {"type": "BOOLEAN"},
            "flags": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "type": {"type": "STRING", "enum": FLAG_TAGS},
                        "reason": {"type": "STRING"},
                        "context": {"type": "STRING"}
                    },
                    "required": ["type", "reason"]
                }
            }
        },
        "required": ["vendor", "amount", "date", "description", "category", "confidence", "flags"]
    })
}

pub fn normalized_item_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "normalizedId": {"type": "STRING"},
            "itemName": {"type": "STRING"},
            "confidence": {"type": "NUMBER"}
        },
        "required": ["normalizedId", "itemName", "confidence"]
    })
}

pub fn commitments_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "isRecurring": {"type": "BOOLEAN"},
            "renewalDate": {"type": "STRING"},
            "cancellationDeadline": {"type": "STRING"},
            "escalationClause": {"type": "STRING"}
        },
        "required": ["isRecurring"]
    })
}
