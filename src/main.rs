//! toolpilot REPL: chat with a local model that can work in one directory

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use toolpilot::agent::{AgentConfig, ConversationController, HistoryStore, Session, TurnOutcome};
use toolpilot::ollama::{ChatClient, ModelBackend};
use toolpilot::security::Workspace;
use toolpilot::tools::{ChatTool, RedirectTable, ToolExecutor, ToolRegistry};

#[derive(Parser, Debug)]
#[command(
    name = "toolpilot",
    about = "Tool-calling chat agent for a local Ollama model",
    version
)]
struct Args {
    /// Directory the agent may read and write
    #[arg(short, long, default_value = "./workspace")]
    workspace: PathBuf,

    /// Ollama server URL
    #[arg(long, env = "OLLAMA_HOST", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Model name (overrides TOOLPILOT_MODEL)
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum model calls per turn (overrides TOOLPILOT_MAX_ITERATIONS)
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Where user turns are persisted
    #[arg(long, default_value = "chat_history.json")]
    history_file: PathBuf,

    /// OTLP endpoint for span export (disabled if not set)
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Restore the last persisted session window
    #[arg(long)]
    resume: bool,

    /// Accept tool calls written as JSON in the message text
    #[arg(long)]
    text_tool_calls: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    toolpilot::tracing::init_tracing("toolpilot", args.otlp_endpoint.as_deref())?;

    let mut config = AgentConfig::from_env();
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(max) = args.max_iterations {
        config.max_iterations = max;
    }
    config.text_tool_call_fallback = args.text_tool_calls;

    let workspace = Workspace::create(&args.workspace)?;
    info!(root = %workspace.root().display(), "Workspace ready");

    let backend: Arc<dyn ModelBackend> = Arc::new(ChatClient::new(&args.ollama_url));

    let mut registry = ToolRegistry::with_builtin_tools();
    registry.register(Arc::new(ChatTool::new(
        Arc::clone(&backend),
        config.model.clone(),
    )));
    let executor = ToolExecutor::new(registry, RedirectTable::builtin(), workspace);

    let store = HistoryStore::new(
        &args.history_file,
        config.max_history_messages,
        config.max_session_messages,
    );
    let session = if args.resume {
        let restored = store.load();
        info!(messages = restored.len(), "Resumed session history");
        Session::with_history(restored)
    } else {
        Session::new()
    };

    let model = config.model.clone();
    let controller = ConversationController::new(backend, Arc::new(executor), config)
        .with_history_store(store);

    println!("toolpilot | model: {} | workspace: {}", model, args.workspace.display());
    println!("Type a message, /history, /metrics, or exit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "/metrics" => {
                print!("{}", toolpilot::metrics::render());
                continue;
            }
            "/history" => {
                for message in session.permanent_history() {
                    println!("[{}] {}", message.role.as_str(), message.content_str());
                }
                continue;
            }
            _ => {}
        }

        // A turn in flight is not cancelled by Ctrl+C; only new turns are
        match controller.handle_turn(&session, input).await {
            TurnOutcome::Response(text) => println!("\n{}\n", text),
            TurnOutcome::Error(text) => {
                warn!(error = %text, "Turn failed");
                println!("\n[ERROR] {}\n", text);
            }
        }
    }

    toolpilot::tracing::shutdown_tracing();
    Ok(())
}
