//! Error types for the off-ramp assistant

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, AssistantError>;

#[derive(Error, Debug)]
pub enum AssistantError {

    // =============================
    // Session Errors
    // =============================

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // =============================
    // Model Provider Errors
    // =============================

    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("Model call timed out after {0}s")]
    ModelTimeout(u64),

    // =============================
    // Surrounding Errors
    // =============================

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("History persistence error: {0}")]
    Persistence(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AssistantError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AssistantError::SessionNotFound(_))
    }

    /// Failures of the model call itself (as opposed to unusable output).
    pub fn is_model_failure(&self) -> bool {
        matches!(
            self,
            AssistantError::ModelInvocation(_)
                | AssistantError::ModelTimeout(_)
                | AssistantError::HttpError(_)
        )
    }
}
