use offramp_assistant::{
    config::AppConfig,
    history::build_persistence,
    presentation,
    ConversationService, GeminiClient, IntentAnalyzer, ReceiptDetails, SessionManager,
    TurnOutcome,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

const COMMANDS: &str = "Commands: /new, /sessions, /switch <id>, /receipt, /market [symbol], /quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Logs go to stderr so they do not interleave with the chat.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env()?;
    if config.gemini_api_key.is_empty() {
        eprintln!("GEMINI_API_KEY not set; replies will fall back to an apology");
    }

    let provider = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        &config.gemini_model,
    )?);
    let analyzer = IntentAnalyzer::with_config(provider, config.analyzer_config());

    let persistence = build_persistence(&config);
    let sessions = Arc::new(
        SessionManager::load_from(persistence.as_ref(), &config.history_scope).await?,
    );
    let service = ConversationService::new(sessions.clone(), analyzer);

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Off-ramp assistant. {}", COMMANDS);

    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input.split_once(' ').unwrap_or((input, "")) {
            ("/quit", _) | ("/exit", _) => break,
            ("/help", _) => println!("{}", COMMANDS),
            ("/new", _) => {
                let session = sessions.create_session().await;
                sessions.set_current(&session.id).await?;
                println!("Started session {}", session.id);
            }
            ("/sessions", _) => {
                let current = sessions.current_session_id().await;
                for session in sessions.list_sessions().await {
                    let marker = if current.as_deref() == Some(session.id.as_str()) { "*" } else { " " };
                    println!(
                        "{} {} {} ({} messages)",
                        marker,
                        session.id,
                        session.title,
                        session.messages().len()
                    );
                }
            }
            ("/switch", id) => match sessions.set_current(id.trim()).await {
                Ok(()) => println!("Switched to {}", id.trim()),
                Err(error) => println!("{}", error),
            },
            ("/receipt", _) => {
                let details = sessions
                    .get_current()
                    .await
                    .and_then(|s| s.running_transaction())
                    .map(|t| ReceiptDetails::from(&t))
                    .unwrap_or_default();
                println!("{}", presentation::render_receipt(&details));
            }
            ("/market", symbol) => {
                let text = {
                    let mut rng = rand::thread_rng();
                    presentation::render_market_update(symbol, &mut rng)
                };
                println!("{}", text);
            }
            _ => {
                let outcome = service.handle_user_message(input, None, None).await?;
                print_outcome(&outcome);

                if let Err(error) = sessions
                    .save_to(persistence.as_ref(), &config.history_scope)
                    .await
                {
                    warn!("Chat history save failed: {}", error);
                }
            }
        }
    }

    sessions
        .save_to(persistence.as_ref(), &config.history_scope)
        .await?;

    Ok(())
}

fn print_outcome(outcome: &TurnOutcome) {
    println!(
        "[{} {:.2}] {}",
        outcome.analysis.intent, outcome.analysis.confidence, outcome.reply.content
    );

    if let Some(metadata) = outcome.reply.metadata.as_ref() {
        for action in &metadata.suggested_actions {
            println!("  - {}", action.label);
        }
        if metadata.auto_trigger_transaction {
            println!("  (ready to submit)");
        }
    }
}
