//! Agent module: the tool-calling conversation loop
//!
//! # Architecture
//!
//! ```text
//! User text → ConversationController::handle_turn(session)
//!                  │
//!                  ├── Session.try_begin()         (one turn per session)
//!                  ├── permanent history → working history
//!                  ▼
//!           ModelBackend /api/chat (history + tool schemas)
//!                  │
//!        ┌─────────┴──────────┐
//!   tool calls             content
//!        │                    │
//!   LoopGuard.check      append to permanent → Response
//!        │
//!   ToolExecutor.execute (sequential, in request order)
//!        │
//!   tool messages → next iteration (until max_iterations)
//!                  │
//!                  ▼
//!           HistoryStore.persist (user turns + session marker)
//! ```

pub mod controller;
pub mod loop_guard;
pub mod sessions;

pub use controller::{
    max_iterations_message, AgentConfig, ConversationController, TurnOutcome,
    ERROR_CHAT_IN_PROGRESS, ERROR_EMPTY_LLM_MESSAGE, ERROR_EMPTY_USER_MESSAGE, ERROR_LOOP_DETECTED,
    SYSTEM_CONCLUDE_SOON,
};
pub use loop_guard::{IterationState, LoopGuard, LoopVerdict};
pub use sessions::{
    is_session_marker, session_marker, HistoryError, HistoryStore, Session, StoredMessage,
    TurnGuard,
};
