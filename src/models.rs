//! Core data models for the off-ramp assistant

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Confidence assumed when the model omits one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Reply used when the model answered but omitted `suggestedResponse`.
pub const HELP_PROMPT: &str =
    "How can I help you today? I can convert your USDT to fiat and send it to your bank account.";

/// Reply used by the malformed-output fallback when the model returned nothing at all.
pub const EMPTY_OUTPUT_APOLOGY: &str =
    "Sorry, I didn't catch that. Could you rephrase your request?";

/// Reply used when the model call itself failed.
pub const MODEL_FAILURE_RESPONSE: &str =
    "I'm having trouble understanding your request right now. Please try again in a moment, or tell me how much USDT you would like to convert.";

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    FiatConversion,
    Query,
    Portfolio,
    TechnicalSupport,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 5] = [
        Intent::FiatConversion,
        Intent::Query,
        Intent::Portfolio,
        Intent::TechnicalSupport,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::FiatConversion => "fiat_conversion",
            Intent::Query => "query",
            Intent::Portfolio => "portfolio",
            Intent::TechnicalSupport => "technical_support",
            Intent::Unknown => "unknown",
        }
    }

    /// Exact tag match; anything outside the closed vocabulary is `None`.
    pub fn from_tag(tag: &str) -> Option<Intent> {
        Intent::ALL.into_iter().find(|intent| intent.as_str() == tag)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    #[default]
    FiatConversion,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedActionKind {
    ConfirmFiat,
    ConnectWallet,
    ApproveToken,
    CheckPortfolio,
    MarketRates,
    LearnMore,
    Cancel,
}

//
// ================= Transaction =================
//

/// Partially filled conversion request. Fields arrive across several turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionData {
    #[serde(rename = "type", default)]
    pub kind: TransactionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_in: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_in: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiat_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiat_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl TransactionData {
    pub fn fiat_conversion() -> Self {
        Self::default()
    }

    /// True when no slot has been filled yet.
    pub fn is_empty(&self) -> bool {
        self.token_in.is_none()
            && self.amount_in.is_none()
            && self.fiat_amount.is_none()
            && self.fiat_currency.is_none()
            && self.recipient.is_none()
            && self.transaction_id.is_none()
            && self.tx_hash.is_none()
    }

    /// Overlay the filled slots of `newer` on top of `self`.
    pub fn merge(&mut self, newer: &TransactionData) {
        fn overlay(slot: &mut Option<String>, value: &Option<String>) {
            if let Some(v) = value {
                if !v.trim().is_empty() {
                    *slot = Some(v.clone());
                }
            }
        }

        overlay(&mut self.token_in, &newer.token_in);
        overlay(&mut self.amount_in, &newer.amount_in);
        overlay(&mut self.fiat_amount, &newer.fiat_amount);
        overlay(&mut self.fiat_currency, &newer.fiat_currency);
        overlay(&mut self.recipient, &newer.recipient);
        overlay(&mut self.transaction_id, &newer.transaction_id);
        overlay(&mut self.tx_hash, &newer.tx_hash);
    }
}

/// Destination account handed to the bank-transfer collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BankAccount {
    pub bank_code: String,
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_code: Option<String>,
}

//
// ================= Suggested Actions =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuggestedAction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SuggestedActionKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<bool>,
}

impl SuggestedAction {
    pub fn new(kind: SuggestedActionKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            data: None,
            priority: None,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn prioritized(mut self) -> Self {
        self.priority = Some(true);
        self
    }
}

//
// ================= Messages =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_data: Option<TransactionData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_actions: Vec<SuggestedAction>,
    #[serde(default)]
    pub confirmation_required: bool,
    #[serde(default)]
    pub auto_trigger_transaction: bool,
    /// Stamped by the session manager on append; caller values are overwritten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>, metadata: Option<MessageMetadata>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content, None)
    }

    pub fn assistant(content: impl Into<String>, metadata: MessageMetadata) -> Self {
        Self::new(MessageRole::Assistant, content, Some(metadata))
    }

    pub fn system(content: impl Into<String>, metadata: Option<MessageMetadata>) -> Self {
        Self::new(MessageRole::System, content, metadata)
    }

    pub fn conversation_count(&self) -> Option<u32> {
        self.metadata.as_ref().and_then(|m| m.conversation_count)
    }

    pub fn transaction_data(&self) -> Option<&TransactionData> {
        self.metadata.as_ref().and_then(|m| m.transaction_data.as_ref())
    }

    /// A system receipt carrying the id returned by the transfer boundary.
    /// It closes the slot-filling cycle it belongs to.
    pub fn is_settlement(&self) -> bool {
        self.role == MessageRole::System
            && self
                .transaction_data()
                .map_or(false, |t| t.transaction_id.is_some())
    }
}

//
// ================= Sessions =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    messages: Vec<ChatMessage>,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

impl ChatSession {
    pub(crate) fn new(title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            messages: Vec::new(),
            created_at: now,
            last_updated: now,
            wallet_address: None,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Append and stamp the 1-based ordinal. `last_updated` never moves backwards.
    pub(crate) fn push(&mut self, mut message: ChatMessage, now: DateTime<Utc>) -> &ChatMessage {
        let ordinal = self.messages.len() as u32 + 1;
        message
            .metadata
            .get_or_insert_with(MessageMetadata::default)
            .conversation_count = Some(ordinal);

        self.last_updated = now.max(self.last_updated).max(self.created_at);
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// Pulls `last_updated` up to `created_at` if a stored copy had it earlier.
    pub(crate) fn repair_timestamps(&mut self) -> bool {
        if self.last_updated < self.created_at {
            self.last_updated = self.created_at;
            return true;
        }
        false
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now.max(self.last_updated);
    }

    /// Running transaction: the snapshots logged since the last settlement,
    /// merged oldest first. `None` when the open cycle has no snapshot yet.
    pub fn running_transaction(&self) -> Option<TransactionData> {
        let opened = self
            .messages
            .iter()
            .rposition(ChatMessage::is_settlement)
            .map_or(0, |i| i + 1);

        let mut snapshots = self.messages[opened..]
            .iter()
            .filter_map(|m| m.transaction_data());
        let mut running = snapshots.next()?.clone();
        for snapshot in snapshots {
            running.merge(snapshot);
        }
        Some(running)
    }
}

/// Every session known to one history scope plus the "current" pointer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryState {
    #[serde(default)]
    pub current_session_id: Option<String>,
    #[serde(default)]
    pub sessions: HashMap<String, ChatSession>,
}

impl ChatHistoryState {
    /// Bring a loaded snapshot back in line with the session invariants.
    /// Returns one note per correction made.
    pub fn normalize(&mut self) -> Vec<String> {
        let mut notes = Vec::new();

        let (keyed, mut rekeyed): (Vec<_>, Vec<_>) = self
            .sessions
            .drain()
            .partition(|(key, session)| *key == session.id);
        rekeyed.sort_by(|a, b| a.0.cmp(&b.0));

        let mut sessions: HashMap<String, ChatSession> = keyed.into_iter().collect();
        for (key, session) in rekeyed {
            if sessions.contains_key(&session.id) {
                notes.push(format!(
                    "session stored under '{}' duplicates id '{}' and was dropped",
                    key, session.id
                ));
            } else {
                notes.push(format!("session stored under '{}' re-keyed to '{}'", key, session.id));
                sessions.insert(session.id.clone(), session);
            }
        }

        for session in sessions.values_mut() {
            if session.repair_timestamps() {
                notes.push(format!(
                    "session '{}' had lastUpdated before createdAt",
                    session.id
                ));
            }
        }
        self.sessions = sessions;

        if self.repair() {
            notes.push("current session pointed at a missing session and was cleared".to_string());
        }
        notes
    }

    /// Clears a `current_session_id` that points at nothing. Returns true if it did.
    pub fn repair(&mut self) -> bool {
        match &self.current_session_id {
            Some(id) if !self.sessions.contains_key(id) => {
                self.current_session_id = None;
                true
            }
            _ => false,
        }
    }
}

//
// ================= Analysis =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalysisResult {
    pub intent: Intent,
    pub confidence: f64,
    pub extracted_data: TransactionData,
    pub required_questions: Vec<String>,
    pub suggested_response: String,
}

impl AiAnalysisResult {
    /// The model answered but nothing usable could be read out of it.
    pub fn malformed_output_fallback(raw: &str) -> Self {
        let suggested_response = if raw.trim().is_empty() {
            EMPTY_OUTPUT_APOLOGY.to_string()
        } else {
            raw.to_string()
        };

        Self {
            intent: Intent::Unknown,
            confidence: 0.0,
            extracted_data: TransactionData::fiat_conversion(),
            required_questions: Vec::new(),
            suggested_response,
        }
    }

    /// The request to the model itself failed.
    pub fn model_failure_fallback() -> Self {
        Self {
            intent: Intent::Unknown,
            confidence: 0.0,
            extracted_data: TransactionData::fiat_conversion(),
            required_questions: Vec::new(),
            suggested_response: MODEL_FAILURE_RESPONSE.to_string(),
        }
    }
}

//
// ================= Validation =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub suggestions: Vec<String>,
}

//
// ================= Receipts =================
//

/// Everything a receipt may show. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptDetails {
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub token_in: Option<String>,
    #[serde(default)]
    pub amount_in: Option<String>,
    #[serde(default)]
    pub fiat_amount: Option<String>,
    #[serde(default)]
    pub fiat_currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub bank_account: Option<BankAccount>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<&TransactionData> for ReceiptDetails {
    fn from(data: &TransactionData) -> Self {
        Self {
            transaction_id: data.transaction_id.clone(),
            tx_hash: data.tx_hash.clone(),
            token_in: data.token_in.clone(),
            amount_in: data.amount_in.clone(),
            fiat_amount: data.fiat_amount.clone(),
            fiat_currency: data.fiat_currency.clone(),
            ..Default::default()
        }
    }
}

//
// ================= Turn Outcome =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub session_id: String,
    pub analysis: AiAnalysisResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    pub reply: ChatMessage,
}
