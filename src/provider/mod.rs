//! Model provider trait and implementations
//!
//! The provider is the only thing that talks to a language model. It takes a
//! rendered prompt and returns the raw text the model produced; everything
//! else (parsing, fallbacks) happens upstream.

use crate::error::AssistantError;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

pub mod gemini;
pub use gemini::GeminiClient;

/// Trait for text generation (network boundary)
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// One canned reply for `ScriptedProvider`
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Failure(String),
    /// Reply only after sleeping, for exercising timeouts.
    Delayed(Duration, String),
}

/// Provider that replays canned replies in order.
/// Keeps the dialogue flow testable without a model.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| ScriptedReply::Text(t.into())))
    }

    pub async fn push(&self, reply: ScriptedReply) {
        self.replies.lock().await.push_back(reply);
    }

    /// Prompts received so far, oldest first.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().await.push(prompt.to_string());

        let reply = self.replies.lock().await.pop_front();
        match reply {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Failure(message)) => Err(AssistantError::ModelInvocation(message)),
            Some(ScriptedReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => Err(AssistantError::ModelInvocation(
                "scripted provider has no replies left".to_string(),
            )),
        }
    }
}
