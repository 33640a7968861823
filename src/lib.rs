//! Off-ramp Chat Assistant
//!
//! A conversational assistant for converting crypto tokens to fiat:
//! - Classifies each user message into an intent with a language model
//! - Extracts transaction slots (token, amount, fiat currency, bank)
//! - Degrades malformed or failed model output to a readable reply
//! - Validates the running transaction before it can be confirmed
//! - Keeps per-session chat history with pluggable persistence
//!
//! TURN FLOW:
//! MESSAGE → PROMPT → MODEL → PARSE → MERGE → VALIDATE → REPLY

pub mod analyzer;
pub mod api;
pub mod config;
pub mod conversation;
pub mod error;
pub mod history;
pub mod interpreter;
pub mod models;
pub mod presentation;
pub mod prompt;
pub mod provider;
pub mod validator;

pub use error::{AssistantError, Result};

// Re-export common types
pub use analyzer::{AnalyzerConfig, IntentAnalyzer};
pub use conversation::ConversationService;
pub use history::SessionManager;
pub use models::*;
pub use provider::{GeminiClient, ModelProvider};
