//! Ollama LLM integration module
//!
//! This module provides the model backend contract and a client for
//! Ollama's `/api/chat` endpoint with tool calling.

pub mod tool_use;

// Re-export public types from the tool_use module
pub use tool_use::{
    parse_tool_calls_from_text, AssistantReply, ChatClient, ChatError, ChatMessage, ChatRequest,
    ChatResponse, FunctionCall, ModelBackend, ReplyError, Role, ToolCall, ToolFunction, ToolSchema,
    DEFAULT_AGENT_SYSTEM_PROMPT, MISSING_TOOL_CALL_ID,
};
