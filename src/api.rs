//! REST API server for the off-ramp assistant
//!
//! Exposes the conversation service over HTTP for the chat frontend.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::conversation::ConversationService;
use crate::error::AssistantError;
use crate::history::HistoryPersistence;
use crate::models::{ReceiptDetails, TransactionData};
use crate::presentation;
use crate::prompt::PromptContext;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub context: Option<PromptContext>,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub make_current: bool,
}

#[derive(Debug, Deserialize)]
pub struct SettlementRequest {
    pub transaction_id: String,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn failure(error: AssistantError) -> ApiResult {
    let status = match &error {
        AssistantError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        AssistantError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiResponse::error(error.to_string())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<ConversationService>,
    pub persistence: Arc<dyn HistoryPersistence>,
    pub scope: String,
}

impl ApiState {
    async fn persist(&self) {
        if let Err(error) = self
            .service
            .sessions()
            .save_to(self.persistence.as_ref(), &self.scope)
            .await
        {
            warn!("Chat history save failed, response will still be returned: {}", error);
        }
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoint
/// =============================

async fn chat_handler(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> ApiResult {
    info!("Received chat message ({} chars)", req.message.chars().count());

    let wallet_address = req.wallet_address.as_deref();
    let outcome = match req.session_id.as_deref() {
        Some(session_id) => {
            state
                .service
                .handle_user_message_in(session_id, &req.message, req.context, wallet_address)
                .await
        }
        None => {
            state
                .service
                .handle_user_message(&req.message, req.context, wallet_address)
                .await
        }
    };

    match outcome {
        Ok(outcome) => {
            state.persist().await;
            ok(outcome)
        }
        Err(e) => failure(e),
    }
}

/// =============================
/// Session Endpoints
/// =============================

async fn list_sessions(State(state): State<ApiState>) -> ApiResult {
    ok(state.service.sessions().list_sessions().await)
}

async fn create_session(
    State(state): State<ApiState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult {
    let sessions = state.service.sessions();
    let session = match req.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => sessions.create_session_titled(title).await,
        None => sessions.create_session().await,
    };

    if req.make_current {
        if let Err(e) = sessions.set_current(&session.id).await {
            return failure(e);
        }
    }

    state.persist().await;
    (StatusCode::CREATED, Json(ApiResponse::success(session)))
}

async fn get_session(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    match state.service.sessions().get_session(&id).await {
        Ok(session) => ok(session),
        Err(e) => failure(e),
    }
}

async fn set_current_session(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    match state.service.sessions().set_current(&id).await {
        Ok(()) => {
            state.persist().await;
            ok(serde_json::json!({ "currentSessionId": id }))
        }
        Err(e) => failure(e),
    }
}

async fn record_settlement(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<SettlementRequest>,
) -> ApiResult {
    if req.transaction_id.trim().is_empty() {
        return failure(AssistantError::InvalidRequest(
            "transaction_id must not be empty".to_string(),
        ));
    }

    match state
        .service
        .record_settlement(&id, req.transaction_id.trim(), req.tx_hash.as_deref())
        .await
    {
        Ok(message) => {
            state.persist().await;
            ok(message)
        }
        Err(e) => failure(e),
    }
}

/// =============================
/// Stateless Endpoints
/// =============================

async fn validate_transaction(
    State(state): State<ApiState>,
    Json(data): Json<TransactionData>,
) -> ApiResult {
    ok(state.service.validator().validate(&data))
}

async fn receipt(Json(details): Json<ReceiptDetails>) -> ApiResult {
    ok(serde_json::json!({ "text": presentation::render_receipt(&details) }))
}

async fn market_update(Path(symbol): Path<String>) -> ApiResult {
    let text = {
        let mut rng = rand::thread_rng();
        presentation::render_market_update(&symbol, &mut rng)
    };
    ok(serde_json::json!({ "text": text }))
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/current", post(set_current_session))
        .route("/api/sessions/:id/settlement", post(record_settlement))
        .route("/api/validate", post(validate_transaction))
        .route("/api/receipt", post(receipt))
        .route("/api/market/:symbol", get(market_update))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
