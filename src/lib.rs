//! toolpilot - a tool-calling conversation controller for local LLMs
//!
//! The model talks to Ollama's `/api/chat`, and may call a fixed set of
//! tools (file edits, directory listing, search, web lookups) inside a
//! single workspace directory. Each user turn is a bounded loop of model
//! calls and tool calls.
//!
//! # Modules
//!
//! - `agent` - Conversation controller, loop guard, sessions and history
//! - `tools` - Tool trait, registry, redirects, executor and builtin tools
//! - `ollama` - Model backend contract and Ollama chat client
//! - `security` - Workspace sandbox for every path a tool touches
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - Logging and optional OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use toolpilot::{AgentConfig, ChatClient, ConversationController, RedirectTable,
//!                 Session, ToolExecutor, ToolRegistry, Workspace};
//!
//! let workspace = Workspace::create("./workspace")?;
//! let executor = ToolExecutor::new(ToolRegistry::with_builtin_tools(), RedirectTable::builtin(), workspace);
//! let controller = ConversationController::new(
//!     Arc::new(ChatClient::new("http://localhost:11434")),
//!     Arc::new(executor),
//!     AgentConfig::default(),
//! );
//!
//! let session = Session::new();
//! let outcome = controller.handle_turn(&session, "list the files in the workspace").await;
//! ```

pub mod agent;
pub mod metrics;
pub mod ollama;
pub mod security;
pub mod tools;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentConfig, ConversationController, HistoryStore, Session, TurnOutcome};
pub use ollama::{ChatClient, ChatMessage, ModelBackend, ToolCall};
pub use security::Workspace;
pub use tools::{RedirectTable, ToolExecutor, ToolRegistry};
