//! Orchestra console
//!
//! Reads user turns from stdin and prints every streamed message as one JSON
//! line on stdout. Logs go to stderr.

use futures::StreamExt;
use orchestra::config::Config;
use orchestra::llm::{LoggingProvider, OpenAiProvider};
use orchestra::runtime::Orchestrator;
use orchestra::session::{SessionHandle, SessionManager};
use orchestra::store::{ConversationStore, MemoryStore, SqliteStore};
use orchestra::tools::ToolRegistry;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Console<S> = SessionManager<S, LoggingProvider, ToolRegistry>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "orchestra=info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = Config::from_env()?;
    let provider = OpenAiProvider::new(config.openai()?)?;
    let provider = Arc::new(LoggingProvider::new(Arc::new(provider)));
    let tools = Arc::new(ToolRegistry::standard()?);
    tracing::info!(model = %config.model, tools = tools.len(), "Provider and tools initialized");

    match &config.db_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %path.display(), "Opening database");
            let store = Arc::new(SqliteStore::open(path)?);
            run_console(Orchestrator::new(store, provider, tools), &config).await
        }
        None => {
            tracing::info!("Using in-memory conversation store");
            let store = Arc::new(MemoryStore::new());
            run_console(Orchestrator::new(store, provider, tools), &config).await
        }
    }
}

async fn run_console<S: ConversationStore + 'static>(
    orchestrator: Orchestrator<S, LoggingProvider, ToolRegistry>,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let sessions = SessionManager::new(orchestrator.with_limits(config.limits)).with_emit_buffer(config.emit_buffer);
    let mut handle = open_session(&sessions, None).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, arg) = line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim()));
        let result = match (command, arg) {
            ("/quit", _) => break,
            ("/new", _) => {
                sessions.close(&handle);
                open_session(&sessions, None).await.map(|h| handle = h)
            }
            ("/resume", id) if !id.is_empty() => {
                sessions.close(&handle);
                open_session(&sessions, Some(id.to_string())).await.map(|h| handle = h)
            }
            ("/history", _) => print_history(&sessions, &handle).await,
            _ => stream_turn(&sessions, &handle, line).await,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Command failed");
            println!("{}", json!({ "error": e.to_string() }));
        }
    }

    sessions.shutdown().await;
    Ok(())
}

async fn open_session<S: ConversationStore + 'static>(
    sessions: &Console<S>,
    conversation_id: Option<String>,
) -> Result<SessionHandle, Box<dyn std::error::Error>> {
    let handle = sessions.open(conversation_id).await?;
    println!("{}", json!({ "conversation_id": handle.conversation_id() }));
    Ok(handle)
}

async fn print_history<S: ConversationStore + 'static>(
    sessions: &Console<S>,
    handle: &SessionHandle,
) -> Result<(), Box<dyn std::error::Error>> {
    for message in sessions.history(handle).await? {
        println!("{}", serde_json::to_string(&message)?);
    }
    Ok(())
}

/// Submit one turn and print its messages until the run ends. Ctrl-C closes
/// the stream, which cancels the run, and waits for the run to let go of it.
async fn stream_turn<S: ConversationStore + 'static>(
    sessions: &Console<S>,
    handle: &SessionHandle,
    text: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = sessions.submit(handle, text)?;
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(message)) => println!("{}", serde_json::to_string(&message)?),
                Some(Err(error)) => println!("{}", json!({ "error": error.to_string() })),
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(conv_id = %handle.conversation_id(), "Interrupted");
                stream.close();
                while stream.next().await.is_some() {}
                return Ok(());
            }
        }
    }
}
