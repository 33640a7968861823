//! Conversation turn handling
//!
//! One user turn end to end: pick or open a session, log the user message,
//! analyze it against the running transaction, fill slots, validate, attach
//! suggested actions and log the assistant reply. Every failure of the model
//! degrades to a conversational reply so the dialogue can always continue.

use crate::analyzer::IntentAnalyzer;
use crate::history::{SessionManager, DEFAULT_SESSION_TITLE};
use crate::models::{
    AiAnalysisResult, ChatMessage, Intent, MessageMetadata, ReceiptDetails,
    SuggestedAction, SuggestedActionKind, TransactionData, TurnOutcome, ValidationResult,
};
use crate::presentation;
use crate::prompt::PromptContext;
use crate::validator::TransactionValidator;
use crate::Result;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

/// Minimum model confidence before a complete transaction may start on its own.
pub const AUTO_TRIGGER_CONFIDENCE: f64 = 0.8;

const TITLE_MAX_CHARS: usize = 40;

pub struct ConversationService {
    sessions: Arc<SessionManager>,
    analyzer: IntentAnalyzer,
    validator: TransactionValidator,
}

impl ConversationService {
    pub fn new(sessions: Arc<SessionManager>, analyzer: IntentAnalyzer) -> Self {
        Self {
            sessions,
            analyzer,
            validator: TransactionValidator::default(),
        }
    }

    pub fn with_validator(mut self, validator: TransactionValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn validator(&self) -> &TransactionValidator {
        &self.validator
    }

    /// Handle one user turn on the current session, opening one if needed.
    pub async fn handle_user_message(
        &self,
        text: &str,
        context: Option<PromptContext>,
        wallet_address: Option<&str>,
    ) -> Result<TurnOutcome> {
        let session = self
            .sessions
            .current_or_create(&session_title(text))
            .await;
        self.run_turn(session.id, text, context, wallet_address).await
    }

    /// Handle one user turn on an explicit session. The current-session
    /// pointer is neither read nor moved.
    pub async fn handle_user_message_in(
        &self,
        session_id: &str,
        text: &str,
        context: Option<PromptContext>,
        wallet_address: Option<&str>,
    ) -> Result<TurnOutcome> {
        let session = self.sessions.get_session(session_id).await?;
        self.run_turn(session.id, text, context, wallet_address).await
    }

    async fn run_turn(
        &self,
        session_id: String,
        text: &str,
        context: Option<PromptContext>,
        wallet_address: Option<&str>,
    ) -> Result<TurnOutcome> {
        if let Some(address) = wallet_address.filter(|a| !a.trim().is_empty()) {
            self.sessions.set_wallet_address(&session_id, address.trim()).await?;
        }

        self.sessions
            .append_message(&session_id, ChatMessage::user(text))
            .await?;

        let session = self.sessions.get_session(&session_id).await?;
        let running = session.running_transaction();
        let wallet_connected = session.wallet_address.is_some();

        let prompt_context = build_context(context, running.as_ref(), wallet_connected);
        let analysis = self
            .analyzer
            .analyze_user_message(text, Some(&prompt_context))
            .await;

        let (transaction, validation) = if analysis.intent == Intent::FiatConversion {
            let mut transaction = running.unwrap_or_default();
            transaction.merge(&analysis.extracted_data);
            let validation = self.validator.validate(&transaction);
            (Some(transaction), Some(validation))
        } else {
            (None, None)
        };

        let metadata = build_metadata(&analysis, transaction, validation.as_ref(), wallet_connected);
        let content = compose_reply(&analysis, validation.as_ref());

        let reply = self
            .sessions
            .append_message(&session_id, ChatMessage::assistant(content, metadata))
            .await?;

        info!(
            session_id = %session_id,
            intent = %analysis.intent,
            valid = ?validation.as_ref().map(|v| v.is_valid),
            "Turn handled"
        );

        Ok(TurnOutcome {
            session_id,
            analysis,
            validation,
            reply,
        })
    }

    /// Record the ids returned by the transfer collaborator and post a receipt.
    pub async fn record_settlement(
        &self,
        session_id: &str,
        transaction_id: &str,
        tx_hash: Option<&str>,
    ) -> Result<ChatMessage> {
        let session = self.sessions.get_session(session_id).await?;

        let mut transaction = session.running_transaction().unwrap_or_default();
        transaction.transaction_id = Some(transaction_id.to_string());
        transaction.tx_hash = tx_hash.map(str::to_string);

        let mut receipt = ReceiptDetails::from(&transaction);
        receipt.status = Some("Submitted".to_string());

        let metadata = MessageMetadata {
            transaction_data: Some(transaction),
            ..Default::default()
        };
        let message = ChatMessage::system(presentation::render_receipt(&receipt), Some(metadata));
        let stored = self.sessions.append_message(session_id, message).await?;

        info!(session_id, transaction_id, "Settlement recorded");
        Ok(stored)
    }
}

fn session_title(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return DEFAULT_SESSION_TITLE.to_string();
    }
    let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    title
}

fn build_context(
    caller: Option<PromptContext>,
    running: Option<&TransactionData>,
    wallet_connected: bool,
) -> PromptContext {
    let mut context = caller.unwrap_or_default();
    context.insert("walletConnected".to_string(), json!(wallet_connected));
    if let Some(transaction) = running.filter(|t| !t.is_empty()) {
        if let Ok(value) = serde_json::to_value(transaction) {
            context.insert("pendingTransaction".to_string(), value);
        }
    }
    context
}

fn transaction_map(transaction: &TransactionData) -> Map<String, Value> {
    match serde_json::to_value(transaction) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn build_metadata(
    analysis: &AiAnalysisResult,
    transaction: Option<TransactionData>,
    validation: Option<&ValidationResult>,
    wallet_connected: bool,
) -> MessageMetadata {
    let mut actions = Vec::new();
    let mut confirmation_required = false;
    let mut auto_trigger_transaction = false;

    match analysis.intent {
        Intent::FiatConversion => {
            let valid = validation.map_or(false, |v| v.is_valid);
            match (&transaction, valid) {
                (Some(txn), true) => {
                    if !wallet_connected {
                        actions.push(
                            SuggestedAction::new(SuggestedActionKind::ConnectWallet, "Connect wallet")
                                .prioritized(),
                        );
                    }
                    let mut confirm = SuggestedAction::new(
                        SuggestedActionKind::ConfirmFiat,
                        confirm_label(txn),
                    )
                    .with_data(transaction_map(txn));
                    if wallet_connected {
                        confirm = confirm.prioritized();
                    }
                    actions.push(confirm);
                    actions.push(SuggestedAction::new(SuggestedActionKind::Cancel, "Cancel"));

                    confirmation_required = true;
                    auto_trigger_transaction =
                        wallet_connected && analysis.confidence >= AUTO_TRIGGER_CONFIDENCE;
                }
                _ => {
                    actions.push(SuggestedAction::new(
                        SuggestedActionKind::MarketRates,
                        "See current rates",
                    ));
                    actions.push(SuggestedAction::new(SuggestedActionKind::Cancel, "Cancel"));
                }
            }
        }
        Intent::Portfolio => {
            actions.push(SuggestedAction::new(
                SuggestedActionKind::CheckPortfolio,
                "Check my balances",
            ));
        }
        Intent::Query => {
            actions.push(SuggestedAction::new(
                SuggestedActionKind::MarketRates,
                "See current rates",
            ));
            actions.push(SuggestedAction::new(SuggestedActionKind::LearnMore, "Learn more"));
        }
        Intent::TechnicalSupport | Intent::Unknown => {
            actions.push(SuggestedAction::new(SuggestedActionKind::LearnMore, "Learn more"));
        }
    }

    MessageMetadata {
        transaction_data: transaction,
        suggested_actions: actions,
        confirmation_required,
        auto_trigger_transaction,
        conversation_count: None,
    }
}

fn confirm_label(transaction: &TransactionData) -> String {
    let token = transaction.token_in.as_deref().unwrap_or("USDT");
    match (&transaction.amount_in, &transaction.fiat_amount) {
        (Some(amount), _) => format!("Convert {} {}", amount, token),
        (None, Some(fiat)) => format!(
            "Receive {} {}",
            fiat,
            transaction.fiat_currency.as_deref().unwrap_or("")
        )
        .trim_end()
        .to_string(),
        (None, None) => format!("Convert {}", token),
    }
}

fn compose_reply(analysis: &AiAnalysisResult, validation: Option<&ValidationResult>) -> String {
    let mut reply = analysis.suggested_response.clone();

    let Some(validation) = validation.filter(|v| !v.is_valid) else {
        return reply;
    };

    let mut follow_ups: Vec<&str> = analysis.required_questions.iter().map(String::as_str).collect();
    if follow_ups.is_empty() {
        follow_ups = validation.errors.iter().map(String::as_str).collect();
    }

    if !follow_ups.is_empty() {
        reply.push_str("\n\nTo continue I still need:");
        for item in follow_ups {
            reply.push_str("\n- ");
            reply.push_str(item);
        }
    }

    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::IntentAnalyzer;
    use crate::models::{MessageRole, MODEL_FAILURE_RESPONSE};
    use crate::provider::{ScriptedProvider, ScriptedReply};

    fn service(replies: Vec<ScriptedReply>) -> (ConversationService, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(replies));
        let analyzer = IntentAnalyzer::new(provider.clone());
        let sessions = Arc::new(SessionManager::new());
        (ConversationService::new(sessions, analyzer), provider)
    }

    fn text(reply: &str) -> ScriptedReply {
        ScriptedReply::Text(reply.to_string())
    }

    fn kinds(message: &ChatMessage) -> Vec<SuggestedActionKind> {
        message
            .metadata
            .as_ref()
            .map(|m| m.suggested_actions.iter().map(|a| a.kind).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_first_message_opens_session() {
        let (service, _) = service(vec![text(
            r#"{"intent": "query", "confidence": 0.9, "suggestedResponse": "Rates are stable."}"#,
        )]);

        let outcome = service
            .handle_user_message("What is the USDT rate today?", None, None)
            .await
            .unwrap();

        let current = service.sessions().get_current().await.unwrap();
        assert_eq!(current.id, outcome.session_id);
        assert_eq!(current.title, "What is the USDT rate today?");
        assert_eq!(current.message_count(), 2);
        assert_eq!(current.messages()[0].role, MessageRole::User);
        assert_eq!(outcome.reply.conversation_count(), Some(2));
        assert_eq!(outcome.reply.content, "Rates are stable.");
        assert_eq!(
            kinds(&outcome.reply),
            vec![SuggestedActionKind::MarketRates, SuggestedActionKind::LearnMore]
        );
        assert!(outcome.validation.is_none());
    }

    #[tokio::test]
    async fn test_slots_fill_across_turns() {
        let (service, provider) = service(vec![
            text(
                r#"{"intent": "fiat_conversion", "confidence": 0.9, "extractedData": {"tokenIn": "USDT"}, "requiredQuestions": ["How much USDT?"], "suggestedResponse": "Sure."}"#,
            ),
            text(
                r#"{"intent": "fiat_conversion", "confidence": 0.92, "extractedData": {"amountIn": "100", "fiatCurrency": "NGN"}, "suggestedResponse": "Ready to convert 100 USDT."}"#,
            ),
        ]);

        let first = service
            .handle_user_message("I want to cash out USDT", None, Some("0xwallet"))
            .await
            .unwrap();
        let first_validation = first.validation.clone().unwrap();
        assert!(!first_validation.is_valid);
        assert!(first.reply.content.contains("How much USDT?"));
        assert_eq!(
            kinds(&first.reply),
            vec![SuggestedActionKind::MarketRates, SuggestedActionKind::Cancel]
        );

        let second = service.handle_user_message("100", None, None).await.unwrap();
        assert_eq!(second.session_id, first.session_id);

        let validation = second.validation.clone().unwrap();
        assert!(validation.is_valid);

        let metadata = second.reply.metadata.clone().unwrap();
        let txn = metadata.transaction_data.unwrap();
        assert_eq!(txn.token_in.as_deref(), Some("USDT"));
        assert_eq!(txn.amount_in.as_deref(), Some("100"));
        assert!(metadata.confirmation_required);
        assert!(metadata.auto_trigger_transaction);
        assert_eq!(metadata.conversation_count, Some(4));
        assert_eq!(
            kinds(&second.reply),
            vec![SuggestedActionKind::ConfirmFiat, SuggestedActionKind::Cancel]
        );

        let prompts = provider.prompts().await;
        assert!(prompts[1].contains("pendingTransaction"));
        assert!(prompts[1].contains("\"walletConnected\": true"));
    }

    #[tokio::test]
    async fn test_valid_without_wallet_asks_to_connect() {
        let (service, _) = service(vec![text(
            r#"{"intent": "fiat_conversion", "confidence": 0.99, "extractedData": {"tokenIn": "USDT", "amountIn": "25"}}"#,
        )]);

        let outcome = service
            .handle_user_message("convert 25 usdt", None, None)
            .await
            .unwrap();
        let metadata = outcome.reply.metadata.clone().unwrap();

        assert!(metadata.confirmation_required);
        assert!(!metadata.auto_trigger_transaction);
        assert_eq!(
            kinds(&outcome.reply),
            vec![
                SuggestedActionKind::ConnectWallet,
                SuggestedActionKind::ConfirmFiat,
                SuggestedActionKind::Cancel
            ]
        );
        assert_eq!(metadata.suggested_actions[0].priority, Some(true));
        assert_eq!(metadata.suggested_actions[1].label, "Convert 25 USDT");
        assert_eq!(
            metadata.suggested_actions[1].data.as_ref().unwrap()["amountIn"],
            "25"
        );
    }

    #[tokio::test]
    async fn test_low_confidence_does_not_auto_trigger() {
        let (service, _) = service(vec![text(
            r#"{"intent": "fiat_conversion", "confidence": 0.6, "extractedData": {"tokenIn": "USDT", "fiatAmount": "50000"}}"#,
        )]);

        let outcome = service
            .handle_user_message("send 50k naira worth", None, Some("0xabc"))
            .await
            .unwrap();
        let metadata = outcome.reply.metadata.unwrap();
        assert!(metadata.confirmation_required);
        assert!(!metadata.auto_trigger_transaction);
    }

    #[tokio::test]
    async fn test_model_failure_still_replies() {
        let (service, _) = service(vec![ScriptedReply::Failure("network down".to_string())]);

        let outcome = service.handle_user_message("hello", None, None).await.unwrap();
        assert_eq!(outcome.analysis.intent, Intent::Unknown);
        assert_eq!(outcome.reply.content, MODEL_FAILURE_RESPONSE);
        assert_eq!(kinds(&outcome.reply), vec![SuggestedActionKind::LearnMore]);

        let session = service.sessions().get_session(&outcome.session_id).await.unwrap();
        assert_eq!(session.message_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_message_is_a_valid_turn() {
        let (service, _) = service(vec![text(r#"{"intent": "unknown"}"#)]);
        let outcome = service.handle_user_message("", None, None).await.unwrap();

        let session = service.sessions().get_session(&outcome.session_id).await.unwrap();
        assert_eq!(session.title, DEFAULT_SESSION_TITLE);
    }

    #[tokio::test]
    async fn test_caller_context_reaches_prompt() {
        let (service, provider) = service(vec![text(r#"{"intent": "portfolio"}"#)]);
        let mut ctx = PromptContext::new();
        ctx.insert("country".to_string(), json!("NG"));

        let outcome = service
            .handle_user_message("my balance", Some(ctx), None)
            .await
            .unwrap();
        assert_eq!(kinds(&outcome.reply), vec![SuggestedActionKind::CheckPortfolio]);
        assert!(provider.prompts().await[0].contains("\"country\": \"NG\""));
    }

    #[tokio::test]
    async fn test_record_settlement() {
        let (service, _) = service(vec![text(
            r#"{"intent": "fiat_conversion", "confidence": 0.9, "extractedData": {"tokenIn": "USDT", "amountIn": "10", "fiatCurrency": "NGN"}}"#,
        )]);
        let outcome = service
            .handle_user_message("sell 10 usdt for naira", None, Some("0xabc"))
            .await
            .unwrap();

        let receipt = service
            .record_settlement(&outcome.session_id, "txn_42", Some("0xhash"))
            .await
            .unwrap();

        assert_eq!(receipt.role, MessageRole::System);
        assert_eq!(receipt.conversation_count(), Some(3));
        assert!(receipt.content.contains("Transaction ID: txn_42"));
        assert!(receipt.content.contains("Amount Sent: 10 USDT"));

        let txn = receipt.transaction_data().unwrap();
        assert_eq!(txn.tx_hash.as_deref(), Some("0xhash"));

        let err = service.record_settlement("missing", "x", None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_new_conversion_after_settlement_starts_clean() {
        let (service, provider) = service(vec![text(
            r#"{"intent": "fiat_conversion", "confidence": 0.9, "extractedData": {"tokenIn": "USDT", "amountIn": "10", "fiatCurrency": "NGN"}}"#,
        )]);
        let first = service
            .handle_user_message("sell 10 usdt", None, Some("0xabc"))
            .await
            .unwrap();
        service
            .record_settlement(&first.session_id, "txn_42", Some("0xhash"))
            .await
            .unwrap();

        provider
            .push(text(
                r#"{"intent": "fiat_conversion", "confidence": 0.9, "extractedData": {"amountIn": "5"}}"#,
            ))
            .await;
        let second = service.handle_user_message("now 5 more", None, None).await.unwrap();
        assert_eq!(second.session_id, first.session_id);

        let txn = second.reply.transaction_data().cloned().unwrap();
        assert_eq!(txn.amount_in.as_deref(), Some("5"));
        assert!(txn.token_in.is_none());
        assert!(txn.fiat_currency.is_none());
        assert!(txn.transaction_id.is_none());
        assert!(txn.tx_hash.is_none());
        assert!(!second.validation.unwrap().is_valid);
        assert!(!provider.prompts().await[1].contains("txn_42"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_explicit_session_turns_stay_in_their_session() {
        let replies = (0..100).map(|_| text(r#"{"intent": "query"}"#)).collect();
        let (service, _) = service(replies);
        let service = Arc::new(service);

        let a = service.sessions().create_session_titled("a").await.id;
        let b = service.sessions().create_session_titled("b").await.id;

        let mut tasks = Vec::new();
        for i in 0..100 {
            let service = service.clone();
            let target = if i % 2 == 0 { a.clone() } else { b.clone() };
            tasks.push(tokio::spawn(async move {
                let outcome = service
                    .handle_user_message_in(&target, &format!("turn {}", i), None, None)
                    .await
                    .unwrap();
                (target, outcome)
            }));
        }

        for task in tasks {
            let (target, outcome) = task.await.unwrap();
            assert_eq!(outcome.session_id, target);
            assert_eq!(outcome.reply.role, MessageRole::Assistant);

            let session = service.sessions().get_session(&target).await.unwrap();
            assert!(session.messages().iter().any(|m| m.id == outcome.reply.id));
        }

        for id in [&a, &b] {
            let session = service.sessions().get_session(id).await.unwrap();
            assert_eq!(session.message_count(), 100);
        }
        assert!(service.sessions().current_session_id().await.is_none());

        let err = service
            .handle_user_message_in("missing", "hi", None, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_turns_share_one_session() {
        let replies = (0..20).map(|_| text(r#"{"intent": "unknown"}"#)).collect();
        let (service, _) = service(replies);
        let service = Arc::new(service);

        let mut tasks = Vec::new();
        for i in 0..20 {
            let service = service.clone();
            tasks.push(tokio::spawn(async move {
                service
                    .handle_user_message(&format!("hello {}", i), None, None)
                    .await
                    .unwrap()
                    .session_id
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);

        let sessions = service.sessions().list_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].message_count(), 40);
    }

    #[test]
    fn test_session_title_truncates() {
        let long = "a".repeat(60);
        let title = session_title(&long);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('…'));
        assert_eq!(session_title("  "), DEFAULT_SESSION_TITLE);
    }

    #[test]
    fn test_compose_reply_falls_back_to_validator_errors() {
        let analysis = AiAnalysisResult {
            intent: Intent::FiatConversion,
            confidence: 0.9,
            extracted_data: TransactionData::default(),
            required_questions: vec![],
            suggested_response: "Okay.".to_string(),
        };
        let validation = ValidationResult {
            is_valid: false,
            errors: vec!["Amount is required".to_string()],
            suggestions: vec![],
        };

        let reply = compose_reply(&analysis, Some(&validation));
        assert!(reply.starts_with("Okay."));
        assert!(reply.contains("- Amount is required"));
    }
}
