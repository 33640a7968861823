//! User message analysis
//!
//! prompt → provider (timeout, bounded retry) → interpreter.
//! `analyze_user_message` never fails: a provider that errors or times out on
//! every attempt yields the model-failure fallback, which is a
//! different reply than the malformed-output fallback.

use crate::error::AssistantError;
use crate::interpreter::{self, ExtractionPolicy};
use crate::models::AiAnalysisResult;
use crate::prompt::{self, PromptContext};
use crate::provider::ModelProvider;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Per-attempt limit on the provider call
    pub timeout: Duration,
    /// Extra attempts after the first one fails
    pub max_retries: u32,
    pub extraction: ExtractionPolicy,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 0,
            extraction: ExtractionPolicy::Greedy,
        }
    }
}

pub struct IntentAnalyzer {
    provider: Arc<dyn ModelProvider>,
    config: AnalyzerConfig,
}

impl IntentAnalyzer {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self::with_config(provider, AnalyzerConfig::default())
    }

    pub fn with_config(provider: Arc<dyn ModelProvider>, config: AnalyzerConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze one user turn. Total.
    pub async fn analyze_user_message(
        &self,
        message: &str,
        context: Option<&PromptContext>,
    ) -> AiAnalysisResult {
        let prompt = prompt::build(message, context);
        let fingerprint = prompt::fingerprint(&prompt);
        debug!(prompt_fingerprint = %fingerprint, "Prompt rendered");

        match self.generate_with_retry(&prompt).await {
            Ok(raw) => {
                let analysis = interpreter::parse_with(&raw, self.config.extraction);
                info!(
                    prompt_fingerprint = %fingerprint,
                    intent = %analysis.intent,
                    confidence = analysis.confidence,
                    "Message analyzed"
                );
                analysis
            }
            Err(e) => {
                warn!(
                    prompt_fingerprint = %fingerprint,
                    provider = self.provider.name(),
                    "Model call failed, using model-failure fallback: {}",
                    e
                );
                AiAnalysisResult::model_failure_fallback()
            }
        }
    }

    async fn generate_with_retry(&self, prompt: &str) -> Result<String> {
        let attempts = self.config.max_retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.generate_once(prompt).await {
                Ok(raw) => return Ok(raw),
                Err(e) => {
                    warn!(attempt, attempts, "Model attempt failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AssistantError::ModelInvocation("no attempts were made".to_string())
        }))
    }

    async fn generate_once(&self, prompt: &str) -> Result<String> {
        match tokio::time::timeout(self.config.timeout, self.provider.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(AssistantError::ModelTimeout(self.config.timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Intent, MODEL_FAILURE_RESPONSE};
    use crate::provider::{ScriptedProvider, ScriptedReply};
    use serde_json::json;

    fn analyzer(provider: Arc<ScriptedProvider>, config: AnalyzerConfig) -> IntentAnalyzer {
        IntentAnalyzer::with_config(provider, config)
    }

    #[tokio::test]
    async fn test_well_formed_reply() {
        let provider = Arc::new(ScriptedProvider::texts([
            r#"{"intent": "fiat_conversion", "confidence": 0.9, "extractedData": {"tokenIn": "USDT", "amountIn": "40"}}"#,
        ]));
        let analyzer = analyzer(provider.clone(), AnalyzerConfig::default());

        let mut ctx = PromptContext::new();
        ctx.insert("walletConnected".to_string(), json!(false));
        let result = analyzer.analyze_user_message("sell 40 usdt", Some(&ctx)).await;

        assert_eq!(result.intent, Intent::FiatConversion);
        assert_eq!(result.extracted_data.amount_in.as_deref(), Some("40"));

        let prompts = provider.prompts().await;
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("\"sell 40 usdt\""));
        assert!(prompts[0].contains("walletConnected"));
    }

    #[tokio::test]
    async fn test_provider_failure_uses_model_failure_fallback() {
        let provider = Arc::new(ScriptedProvider::new([ScriptedReply::Failure(
            "401 unauthorized".to_string(),
        )]));
        let result = analyzer(provider, AnalyzerConfig::default())
            .analyze_user_message("hi", None)
            .await;

        assert_eq!(result.intent, Intent::Unknown);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.suggested_response, MODEL_FAILURE_RESPONSE);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_not_model_failure() {
        let provider = Arc::new(ScriptedProvider::texts(["no json here"]));
        let result = analyzer(provider, AnalyzerConfig::default())
            .analyze_user_message("hi", None)
            .await;

        assert_eq!(result.intent, Intent::Unknown);
        assert_eq!(result.suggested_response, "no json here");
    }

    #[tokio::test]
    async fn test_timeout_is_treated_as_failure() {
        let provider = Arc::new(ScriptedProvider::new([ScriptedReply::Delayed(
            Duration::from_secs(5),
            r#"{"intent": "query"}"#.to_string(),
        )]));
        let config = AnalyzerConfig {
            timeout: Duration::from_millis(20),
            ..AnalyzerConfig::default()
        };
        let result = analyzer(provider, config).analyze_user_message("hi", None).await;

        assert_eq!(result.suggested_response, MODEL_FAILURE_RESPONSE);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_failure() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedReply::Failure("503".to_string()),
            ScriptedReply::Text(r#"{"intent": "portfolio", "confidence": 0.8}"#.to_string()),
        ]));
        let config = AnalyzerConfig {
            max_retries: 1,
            ..AnalyzerConfig::default()
        };
        let result = analyzer(provider.clone(), config)
            .analyze_user_message("balance?", None)
            .await;

        assert_eq!(result.intent, Intent::Portfolio);
        assert_eq!(provider.prompts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted_falls_back() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedReply::Failure("503".to_string()),
            ScriptedReply::Failure("503".to_string()),
            ScriptedReply::Text(r#"{"intent": "query"}"#.to_string()),
        ]));
        let config = AnalyzerConfig {
            max_retries: 1,
            ..AnalyzerConfig::default()
        };
        let result = analyzer(provider.clone(), config)
            .analyze_user_message("rates?", None)
            .await;

        assert_eq!(result.suggested_response, MODEL_FAILURE_RESPONSE);
        assert_eq!(provider.prompts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_huge_retry_count_still_attempts() {
        let provider = Arc::new(ScriptedProvider::texts([r#"{"intent": "query"}"#]));
        let config = AnalyzerConfig {
            max_retries: u32::MAX,
            ..AnalyzerConfig::default()
        };
        let result = analyzer(provider.clone(), config)
            .analyze_user_message("rates?", None)
            .await;

        assert_eq!(result.intent, Intent::Query);
        assert_eq!(provider.prompts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_balanced_extraction_config() {
        let provider = Arc::new(ScriptedProvider::texts([
            r#"{"intent": "query", "confidence": 0.6} see {docs}"#,
        ]));
        let config = AnalyzerConfig {
            extraction: ExtractionPolicy::Balanced,
            ..AnalyzerConfig::default()
        };
        let result = analyzer(provider, config).analyze_user_message("fees?", None).await;
        assert_eq!(result.intent, Intent::Query);
    }
}
