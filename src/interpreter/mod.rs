//! Model response interpreter
//!
//! Turns untrusted model output into an `AiAnalysisResult`. `parse` is total:
//! whatever the model returns, the caller gets a structurally valid result.
//!
//! Ladder:
//! 1. no JSON candidate in the text        → malformed-output fallback
//! 2. candidate does not parse as an object → malformed-output fallback
//! 3. object parses                        → field-by-field read with defaults

pub mod extract;

pub use extract::ExtractionPolicy;

use crate::models::{
    AiAnalysisResult, Intent, TransactionData, DEFAULT_CONFIDENCE, HELP_PROMPT,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Interpret raw model output using the greedy extraction policy.
pub fn parse(raw: &str) -> AiAnalysisResult {
    parse_with(raw, ExtractionPolicy::Greedy)
}

pub fn parse_with(raw: &str, policy: ExtractionPolicy) -> AiAnalysisResult {
    let candidates = extract::candidates(raw, policy);

    if candidates.is_empty() {
        warn!(policy = ?policy, "No JSON object in model output, using malformed-output fallback");
        debug!(raw = %raw, "Unparseable model output");
        return AiAnalysisResult::malformed_output_fallback(raw);
    }

    for candidate in candidates {
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(fields)) => return read_analysis(&fields),
            Ok(_) => debug!("JSON candidate is not an object"),
            Err(e) => debug!(error = %e, "JSON candidate failed to parse"),
        }
    }

    warn!(policy = ?policy, "Model output JSON is malformed, using malformed-output fallback");
    debug!(raw = %raw, "Unparseable model output");
    AiAnalysisResult::malformed_output_fallback(raw)
}

/// Read each field independently, pairing every read with its default.
fn read_analysis(fields: &Map<String, Value>) -> AiAnalysisResult {
    let intent = fields
        .get("intent")
        .and_then(Value::as_str)
        .and_then(|tag| Intent::from_tag(&tag.trim().to_ascii_lowercase()))
        .unwrap_or(Intent::Unknown);

    let confidence = fields
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE);

    let extracted_data = fields
        .get("extractedData")
        .and_then(Value::as_object)
        .map(read_transaction)
        .unwrap_or_default();

    let required_questions = fields
        .get("requiredQuestions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let suggested_response = fields
        .get("suggestedResponse")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| HELP_PROMPT.to_string());

    AiAnalysisResult {
        intent,
        confidence,
        extracted_data,
        required_questions,
        suggested_response,
    }
}

fn read_transaction(fields: &Map<String, Value>) -> TransactionData {
    TransactionData {
        token_in: text_field(fields, &["tokenIn", "token_in"])
            .map(|t| t.to_ascii_uppercase()),
        amount_in: text_field(fields, &["amountIn", "amount_in"]),
        fiat_amount: text_field(fields, &["fiatAmount", "fiat_amount"]),
        fiat_currency: text_field(fields, &["fiatCurrency", "fiat_currency"])
            .map(|c| c.to_ascii_uppercase()),
        recipient: text_field(fields, &["recipient"]),
        transaction_id: text_field(fields, &["transactionId", "transaction_id"]),
        tx_hash: text_field(fields, &["txHash", "tx_hash"]),
        ..TransactionData::fiat_conversion()
    }
}

/// First non-empty string or number under any of `keys`, as text.
fn text_field(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match fields.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
