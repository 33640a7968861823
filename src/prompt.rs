//! Intent-extraction prompt
//!
//! Renders one user turn plus optional context into the single prompt the
//! model sees. Rendering is pure: the same input always yields the same text.

use crate::models::Intent;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Key/value context handed to the model alongside the user message.
/// `serde_json::Map` is key-ordered, which keeps rendering deterministic.
pub type PromptContext = Map<String, Value>;

/// The one asset the product converts.
pub const SUPPORTED_TOKEN: &str = "USDT";

/// A sample exchange shown to the model for one intent.
#[derive(Debug, Clone, Copy)]
pub struct WorkedExample {
    pub intent: Intent,
    pub user_message: &'static str,
    pub response_json: &'static str,
}

pub const WORKED_EXAMPLES: [WorkedExample; 5] = [
    WorkedExample {
        intent: Intent::FiatConversion,
        user_message: "I want to convert 100 USDT to naira",
        response_json: r#"{"intent": "fiat_conversion", "confidence": 0.95, "extractedData": {"type": "fiat_conversion", "tokenIn": "USDT", "amountIn": "100", "fiatCurrency": "NGN"}, "requiredQuestions": ["Which bank account should receive the funds?"], "suggestedResponse": "Great, I can convert 100 USDT to NGN for you. Which bank account should receive the funds?"}"#,
    },
    WorkedExample {
        intent: Intent::Query,
        user_message: "What is the current USDT rate?",
        response_json: r#"{"intent": "query", "confidence": 0.9, "extractedData": {}, "requiredQuestions": [], "suggestedResponse": "I can show you the latest USDT market rates."}"#,
    },
    WorkedExample {
        intent: Intent::Portfolio,
        user_message: "How much USDT do I have?",
        response_json: r#"{"intent": "portfolio", "confidence": 0.88, "extractedData": {}, "requiredQuestions": [], "suggestedResponse": "Let me check the balances in your connected wallet."}"#,
    },
    WorkedExample {
        intent: Intent::TechnicalSupport,
        user_message: "My transfer has been pending for an hour",
        response_json: r#"{"intent": "technical_support", "confidence": 0.85, "extractedData": {}, "requiredQuestions": ["Do you have the transaction ID?"], "suggestedResponse": "Sorry about the delay. Could you share the transaction ID so I can look into it?"}"#,
    },
    WorkedExample {
        intent: Intent::Unknown,
        user_message: "Tell me a joke",
        response_json: r#"{"intent": "unknown", "confidence": 0.3, "extractedData": {}, "requiredQuestions": [], "suggestedResponse": "I can help you convert USDT to cash in your bank account. Would you like to start a conversion?"}"#,
    },
];

const INSTRUCTIONS: &str = r#"You are the assistant of a crypto-to-fiat off-ramp. Users convert stablecoins into local currency paid to their bank account.

Classify the user's message into exactly ONE intent:
- fiat_conversion – the user wants to convert crypto to fiat or send money to a bank account
- query – a question about rates, fees, limits or how the service works
- portfolio – the user asks about balances or holdings
- technical_support – the user reports a problem with a transaction, wallet or the app
- unknown – anything else

Supported asset: USDT only. If the user mentions another token, still use "USDT" only if they agree to it; otherwise leave tokenIn empty and ask.

Extract any transaction details the user gives into extractedData:
- type: always "fiat_conversion"
- tokenIn: token symbol
- amountIn: crypto amount as a string
- fiatAmount: fiat amount as a string, when the user states the amount in fiat
- fiatCurrency: ISO currency code, e.g. "NGN"
- recipient: account or beneficiary details if given

List follow-up questions for missing details in requiredQuestions, in the order they should be asked.

Rules:
- Return ONLY valid JSON
- No explanation text, no markdown fences
- confidence is a number between 0 and 1
- JSON format:

{
  "intent": "fiat_conversion | query | portfolio | technical_support | unknown",
  "confidence": 0.0,
  "extractedData": { "type": "fiat_conversion" },
  "requiredQuestions": ["..."],
  "suggestedResponse": "..."
}"#;

/// Build the intent-extraction prompt for one user turn.
///
/// The message is embedded as a JSON string literal so quotes, newlines and
/// delimiter text inside it cannot escape its field.
pub fn build(message: &str, context: Option<&PromptContext>) -> String {
    let mut prompt = String::with_capacity(INSTRUCTIONS.len() + 2048);
    prompt.push_str(INSTRUCTIONS);

    prompt.push_str("\n\nEXAMPLES:\n");
    for example in WORKED_EXAMPLES.iter() {
        prompt.push_str(&format!(
            "\n[{}]\nUser: {}\nResponse: {}\n",
            example.intent,
            quote(example.user_message),
            example.response_json
        ));
    }

    prompt.push_str("\nCONTEXT:\n");
    match context {
        Some(ctx) if !ctx.is_empty() => {
            let rendered = serde_json::to_string_pretty(ctx).unwrap_or_else(|_| "none".to_string());
            prompt.push_str(&rendered);
        }
        _ => prompt.push_str("none"),
    }

    prompt.push_str("\n\nUSER MESSAGE (JSON string):\n");
    prompt.push_str(&quote(message));
    prompt.push_str("\n\nRESPONSE:");

    prompt
}

/// SHA-256 of a rendered prompt, used to correlate log lines.
pub fn fingerprint(prompt: &str) -> String {
    hex::encode(Sha256::digest(prompt.as_bytes()))
}

fn quote(text: &str) -> String {
    // Serializing a &str cannot fail.
    serde_json::to_string(text).unwrap_or_default()
}
