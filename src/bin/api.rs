use offramp_assistant::{
    api::{start_server, ApiState},
    config::AppConfig,
    history::build_persistence,
    ConversationService, GeminiClient, IntentAnalyzer, SessionManager,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    if config.gemini_api_key.is_empty() {
        warn!("GEMINI_API_KEY not set; every turn will fall back to the apology reply");
    }

    info!("Off-ramp Assistant - API Server");
    info!("Port: {}", config.api_port);
    info!("Model: {}", config.gemini_model);

    let provider = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        &config.gemini_model,
    )?);
    let analyzer = IntentAnalyzer::with_config(provider, config.analyzer_config());

    let persistence = build_persistence(&config);
    let sessions = match SessionManager::load_from(persistence.as_ref(), &config.history_scope).await {
        Ok(sessions) => sessions,
        Err(error) => {
            warn!("Could not restore chat history, starting empty: {}", error);
            SessionManager::new()
        }
    };

    let service = Arc::new(ConversationService::new(Arc::new(sessions), analyzer));
    info!("Conversation service initialized");

    let state = ApiState {
        service,
        persistence,
        scope: config.history_scope.clone(),
    };

    start_server(state, config.api_port).await?;

    Ok(())
}
