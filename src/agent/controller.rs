//! Conversation Controller - the tool-calling loop behind one user turn
//!
//! `handle_turn` repeatedly asks the model for a completion, runs the tool
//! calls it requests, and feeds the results back until the model answers in
//! plain text, repeats itself, or runs out of iterations.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::metrics::{AGENT_ITERATIONS_TOTAL, AGENT_TURNS, LLM_CALL_TIME};
use crate::ollama::{
    ChatMessage, ChatRequest, ModelBackend, ReplyError, Role, DEFAULT_AGENT_SYSTEM_PROMPT,
};
use crate::tools::ToolExecutor;

use super::loop_guard::{IterationState, LoopVerdict};
use super::sessions::{HistoryStore, Session};

pub const ERROR_CHAT_IN_PROGRESS: &str =
    "Chat already in progress, please wait for current request to complete";
pub const ERROR_EMPTY_LLM_MESSAGE: &str = "Received an empty message from the model.";
pub const ERROR_EMPTY_USER_MESSAGE: &str = "Message is empty, nothing to send.";
pub const ERROR_LOOP_DETECTED: &str =
    "I noticed a potential loop in my processing. Let me summarize what I've found so far.";
pub const SYSTEM_CONCLUDE_SOON: &str =
    "Please try to reach a conclusion soon. Avoid using more tools unless absolutely necessary.";

/// Summary returned when the iteration budget runs out
pub fn max_iterations_message(max_iterations: usize) -> String {
    format!(
        "Reached maximum number of tool call iterations ({}). Let me summarize what I've found so far.",
        max_iterations
    )
}

/// Configuration for the conversation controller
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model to use for Ollama (e.g., "llama3.1")
    pub model: String,
    /// Maximum number of model calls in one turn
    pub max_iterations: usize,
    /// Iterations after which the "conclude soon" nudge is sent
    pub conclude_after_iteration: usize,
    /// User messages kept in the history file
    pub max_history_messages: usize,
    /// Messages restored after the session marker on resume
    pub max_session_messages: usize,
    /// Custom system prompt (uses default if None)
    pub system_prompt: Option<String>,
    /// Treat JSON tool calls written into the content as real tool calls
    pub text_tool_call_fallback: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1".to_string(),
            max_iterations: 10,
            conclude_after_iteration: 2,
            max_history_messages: 10,
            max_session_messages: 10,
            system_prompt: None,
            text_tool_call_fallback: false,
        }
    }
}

impl AgentConfig {
    /// Defaults overridden by `TOOLPILOT_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key/value source
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(model) = lookup("TOOLPILOT_MODEL").filter(|m| !m.trim().is_empty()) {
            self.model = model;
        }
        let numeric = |key: &str, current: usize| match lookup(key) {
            None => current,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(key, value = %raw, "Ignoring malformed numeric setting");
                current
            }),
        };
        self.max_iterations = numeric("TOOLPILOT_MAX_ITERATIONS", self.max_iterations);
        self.max_history_messages =
            numeric("TOOLPILOT_MAX_HISTORY_MESSAGES", self.max_history_messages);
        self.max_session_messages =
            numeric("TOOLPILOT_MAX_SESSION_MESSAGES", self.max_session_messages);
        self
    }
}

/// What `handle_turn` hands back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnOutcome {
    Response(String),
    Error(String),
}

impl TurnOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, TurnOutcome::Error(_))
    }

    pub fn text(&self) -> &str {
        match self {
            TurnOutcome::Response(t) | TurnOutcome::Error(t) => t,
        }
    }
}

/// How a turn ended, for metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnEnd {
    Response,
    LoopDetected,
    MaxIterations,
    Error,
}

impl TurnEnd {
    fn label(self) -> &'static str {
        match self {
            TurnEnd::Response => "response",
            TurnEnd::LoopDetected => "loop_detected",
            TurnEnd::MaxIterations => "max_iterations",
            TurnEnd::Error => "error",
        }
    }
}

fn is_nudge(message: &ChatMessage) -> bool {
    message.role == Role::System && message.content_str() == SYSTEM_CONCLUDE_SOON
}

/// Drives the model ↔ tool loop for any number of sessions
pub struct ConversationController {
    backend: Arc<dyn ModelBackend>,
    executor: Arc<ToolExecutor>,
    config: AgentConfig,
    history_store: Option<HistoryStore>,
}

impl ConversationController {
    /// Create a new controller
    ///
    /// # Arguments
    /// * `backend` - Model backend (usually a [`crate::ollama::ChatClient`])
    /// * `executor` - Tool executor bound to a workspace
    /// * `config` - Agent configuration
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        executor: Arc<ToolExecutor>,
        config: AgentConfig,
    ) -> Self {
        Self {
            backend,
            executor,
            config,
            history_store: None,
        }
    }

    /// Persist user turns after every `handle_turn`
    pub fn with_history_store(mut self, store: HistoryStore) -> Self {
        self.history_store = Some(store);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// Run one user turn to completion
    ///
    /// Rejected without touching the session if the text is blank or
    /// another turn on the same session is still running.
    pub async fn handle_turn(&self, session: &Session, user_text: &str) -> TurnOutcome {
        if user_text.trim().is_empty() {
            debug!(session = %session.id(), "Ignoring blank user message");
            AGENT_TURNS.with_label_values(&["rejected"]).inc();
            return TurnOutcome::Error(ERROR_EMPTY_USER_MESSAGE.to_string());
        }

        let Some(_guard) = session.try_begin() else {
            warn!(session = %session.id(), "Turn rejected, session busy");
            AGENT_TURNS.with_label_values(&["rejected"]).inc();
            return TurnOutcome::Error(ERROR_CHAT_IN_PROGRESS.to_string());
        };

        let trace_id = Uuid::now_v7().to_string();
        let turn_span = info_span!(
            "agent_turn",
            trace_id = %trace_id,
            session_id = %session.id(),
            model = %self.config.model,
            otel.name = "agent_turn"
        );

        async {
            info!(trace_id = %trace_id, "Starting turn");
            session.append_user_message(user_text);

            let mut working = self.initial_working_history(session);
            let mut state = IterationState::new();
            let (outcome, end) = self.run_iterations(session, &mut working, &mut state, &trace_id).await;

            session.set_working(working);
            self.persist(session);

            AGENT_TURNS.with_label_values(&[end.label()]).inc();
            AGENT_ITERATIONS_TOTAL.observe(state.count as f64);
            info!(
                trace_id = %trace_id,
                iterations = state.count,
                outcome = end.label(),
                "Turn finished"
            );
            outcome
        }
        .instrument(turn_span)
        .await
    }

    /// System prompt followed by the permanent history, minus stale nudges
    fn initial_working_history(&self, session: &Session) -> Vec<ChatMessage> {
        let prompt = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_AGENT_SYSTEM_PROMPT.to_string());

        let mut working = vec![ChatMessage::system(prompt)];
        working.extend(
            session
                .permanent_history()
                .into_iter()
                .filter(|m| !is_nudge(m)),
        );
        working
    }

    async fn run_iterations(
        &self,
        session: &Session,
        working: &mut Vec<ChatMessage>,
        state: &mut IterationState,
        trace_id: &str,
    ) -> (TurnOutcome, TurnEnd) {
        let tools = self.executor.registry().schemas();

        loop {
            if state.count >= self.config.max_iterations {
                warn!(trace_id = %trace_id, iterations = state.count, "Max iterations reached");
                let summary = max_iterations_message(self.config.max_iterations);
                session.push_permanent(ChatMessage::assistant(summary.clone()));
                return (TurnOutcome::Response(summary), TurnEnd::MaxIterations);
            }

            let iteration = state.advance();
            working.retain(|m| !is_nudge(m));
            if iteration > self.config.conclude_after_iteration {
                working.push(ChatMessage::system(SYSTEM_CONCLUDE_SOON));
            }

            let llm_span = info_span!(
                "llm_call",
                trace_id = %trace_id,
                iteration,
                model = %self.config.model,
                otel.name = "llm_call"
            );
            let request = ChatRequest {
                model: self.config.model.clone(),
                messages: working.clone(),
                tools: Some(tools.clone()),
            };

            let call_start = Instant::now();
            let response = self.backend.chat(request).instrument(llm_span).await;
            let elapsed = call_start.elapsed().as_secs_f64();
            LLM_CALL_TIME
                .with_label_values(&[self.config.model.as_str()])
                .observe(elapsed);

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    error!(trace_id = %trace_id, iteration, error = %e, "Model request failed");
                    return (
                        TurnOutcome::Error(format!("Model request failed: {}", e)),
                        TurnEnd::Error,
                    );
                }
            };
            debug!(trace_id = %trace_id, iteration, duration_s = elapsed, "Model call completed");

            let reply = match response.into_reply(self.config.text_tool_call_fallback) {
                Ok(r) => r,
                Err(ReplyError::EmptyMessage) => {
                    warn!(trace_id = %trace_id, iteration, "Empty message from model");
                    return (
                        TurnOutcome::Error(ERROR_EMPTY_LLM_MESSAGE.to_string()),
                        TurnEnd::Error,
                    );
                }
                Err(e @ ReplyError::MalformedToolCalls(_)) => {
                    warn!(trace_id = %trace_id, iteration, error = %e, "Malformed tool calls");
                    return (TurnOutcome::Error(e.to_string()), TurnEnd::Error);
                }
            };

            if reply.tool_calls.is_empty() {
                let content = reply.content.unwrap_or_default();
                let message = ChatMessage::assistant(content.clone());
                working.push(message.clone());
                session.push_permanent(message);
                return (TurnOutcome::Response(content), TurnEnd::Response);
            }

            let names: Vec<String> = reply
                .tool_calls
                .iter()
                .map(|c| c.name().unwrap_or("").to_string())
                .collect();
            info!(trace_id = %trace_id, iteration, tools = ?names, "Model requested tools");

            working.push(ChatMessage::assistant_tool_calls(
                reply.content.clone(),
                reply.tool_calls.clone(),
            ));

            if state.observe(names) == LoopVerdict::LoopDetected {
                warn!(trace_id = %trace_id, iteration, "Tool-call loop detected");
                session.push_permanent(ChatMessage::assistant(ERROR_LOOP_DETECTED));
                return (
                    TurnOutcome::Response(ERROR_LOOP_DETECTED.to_string()),
                    TurnEnd::LoopDetected,
                );
            }

            // Sequential: later calls may depend on files created by earlier ones
            for call in &reply.tool_calls {
                let output = self.executor.execute(call).await;
                working.push(ChatMessage::tool(call.call_id(), output));
            }
        }
    }

    fn persist(&self, session: &Session) {
        let Some(store) = &self.history_store else {
            return;
        };
        if let Err(e) = store.persist(session.marker(), &session.permanent_history()) {
            error!(session = %session.id(), path = %store.path().display(), error = %e, "Failed to persist history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.model, "llama3.1");
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.conclude_after_iteration, 2);
        assert_eq!(config.max_history_messages, 10);
        assert_eq!(config.max_session_messages, 10);
        assert!(config.system_prompt.is_none());
        assert!(!config.text_tool_call_fallback);
    }

    #[test]
    fn test_config_overrides() {
        let env: HashMap<&str, &str> = [
            ("TOOLPILOT_MODEL", "qwen3"),
            ("TOOLPILOT_MAX_ITERATIONS", "4"),
            ("TOOLPILOT_MAX_HISTORY_MESSAGES", "many"),
        ]
        .into_iter()
        .collect();

        let config =
            AgentConfig::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.model, "qwen3");
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.max_history_messages, 10);
    }

    #[test]
    fn test_turn_outcome_serializes_as_response_or_error() {
        let ok = serde_json::to_value(TurnOutcome::Response("Done.".into())).unwrap();
        assert_eq!(ok, serde_json::json!({"response": "Done."}));
        let err = serde_json::to_value(TurnOutcome::Error("nope".into())).unwrap();
        assert_eq!(err, serde_json::json!({"error": "nope"}));
    }

    #[test]
    fn test_max_iterations_message() {
        assert!(max_iterations_message(3).contains("(3)"));
    }
}
