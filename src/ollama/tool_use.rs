//! Ollama Chat API with tool calling support
//!
//! This module provides the model backend contract used by the agent
//! (`ModelBackend`), the message types exchanged with it, and a client for
//! Ollama's `/api/chat` endpoint that implements the contract.
//!
//! Model output is untrusted: a response is kept as raw JSON until
//! [`ChatResponse::into_reply`] interprets it, so a malformed `tool_calls`
//! field is reported instead of failing deserialization.

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Correlation id used when the model omits one
pub const MISSING_TOOL_CALL_ID: &str = "N/A";

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A message in a chat conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    /// Absent on assistant messages that only request tool calls.
    /// Sent as `""` on the wire because Ollama expects the field.
    #[serde(default, serialize_with = "content_or_empty")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

fn content_or_empty<S: Serializer>(content: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(content.as_deref().unwrap_or(""))
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Tool output, tagged with the id of the call that produced it
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Assistant message that requests tool execution
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.filter(|c| !c.is_empty()),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Text content, or `""` when absent
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// A tool call from the model
///
/// Fields are optional because the model does not always follow the
/// schema; the executor reports what is missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub function: FunctionCall,
}

/// Function call details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Either a JSON object or a JSON-encoded string
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            function: FunctionCall {
                name: Some(name.into()),
                arguments,
            },
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Build a call from whatever shape the model emitted; never fails
    ///
    /// Accepts `{"id", "function": {"name", "arguments"}}` as well as the flat
    /// `{"name", "arguments"|"parameters"}` form.
    pub fn from_value(value: &Value) -> Self {
        let id = value.get("id").and_then(Value::as_str).map(String::from);
        let function = value.get("function").unwrap_or(value);
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .map(String::from);
        let arguments = function
            .get("arguments")
            .or_else(|| function.get("parameters"))
            .cloned()
            .unwrap_or(Value::Null);

        Self {
            id,
            function: FunctionCall { name, arguments },
        }
    }

    /// Name as emitted by the model, if any
    pub fn name(&self) -> Option<&str> {
        self.function.name.as_deref()
    }

    /// Correlation id, falling back to [`MISSING_TOOL_CALL_ID`]
    pub fn call_id(&self) -> &str {
        self.id.as_deref().unwrap_or(MISSING_TOOL_CALL_ID)
    }
}

/// Tool definition for the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub tool_type: String, // Always "function"
    pub function: ToolFunction,
}

/// Function specification for a tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value, // JSON Schema
}

/// Everything sent to the model for one completion
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSchema>>,
}

/// Response from /api/chat
///
/// `message` stays raw JSON; see [`ChatResponse::into_reply`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub eval_count: u32,
    #[serde(default)]
    pub eval_duration: u64,
}

/// What the assistant asked for in one response
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// A response whose shape violates the protocol
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyError {
    /// `message` missing, null, or carrying neither content nor tool calls
    EmptyMessage,
    /// `tool_calls` present but not a list
    MalformedToolCalls(String),
}

impl std::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyError::EmptyMessage => write!(f, "Empty message received from the model"),
            ReplyError::MalformedToolCalls(raw) => {
                write!(f, "Received unexpected tool_calls format from the model: {}", raw)
            }
        }
    }
}

impl std::error::Error for ReplyError {}

impl ChatResponse {
    /// Wrap a raw message value (handy for tests and non-Ollama backends)
    pub fn from_message(message: Value) -> Self {
        Self {
            message: Some(message),
            done: true,
            ..Default::default()
        }
    }

    /// Interpret the raw message
    ///
    /// With `text_fallback`, a reply without native tool calls whose content
    /// is a JSON tool call is treated as if the call had been native.
    pub fn into_reply(self, text_fallback: bool) -> Result<AssistantReply, ReplyError> {
        let message = match self.message {
            Some(Value::Object(map)) => map,
            _ => return Err(ReplyError::EmptyMessage),
        };

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .map(String::from);

        let mut tool_calls = match message.get("tool_calls") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(calls)) => calls.iter().map(ToolCall::from_value).collect(),
            Some(other) => return Err(ReplyError::MalformedToolCalls(other.to_string())),
        };

        if tool_calls.is_empty() && text_fallback {
            if let Some(text) = content.as_deref() {
                tool_calls = parse_tool_calls_from_text(text);
            }
        }

        let has_content = content.as_deref().is_some_and(|c| !c.trim().is_empty());
        if tool_calls.is_empty() && !has_content {
            return Err(ReplyError::EmptyMessage);
        }

        Ok(AssistantReply {
            content,
            tool_calls,
        })
    }
}

/// Error type for chat operations
#[derive(Debug)]
pub enum ChatError {
    Request(reqwest::Error),
    Parse(serde_json::Error),
    Status(u16, String),
    EmptyResponse,
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::Request(e) => write!(f, "Request error: {}", e),
            ChatError::Parse(e) => write!(f, "Parse error: {}", e),
            ChatError::Status(code, body) => write!(f, "HTTP {}: {}", code, body),
            ChatError::EmptyResponse => write!(f, "Empty response from Ollama"),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Request(e)
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Parse(e)
    }
}

/// The language-model service the agent talks to
///
/// One request in, one response out. Implementations must not interpret
/// the message; the controller does that.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ChatError>;
}

/// Client for Ollama's /api/chat endpoint with tool support
#[derive(Clone)]
pub struct ChatClient {
    base_url: String,
    client: reqwest::Client,
}

impl ChatClient {
    /// Create a new chat client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ModelBackend for ChatClient {
    /// Send a chat request with optional tools
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        let endpoint = format!("{}/api/chat", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "options": {
                "temperature": 0.0
            }
        });

        if let Some(t) = request.tools {
            body["tools"] = serde_json::to_value(t)?;
        }

        let response = self.client.post(&endpoint).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ChatError::Status(status.as_u16(), text));
        }

        if text.is_empty() {
            return Err(ChatError::EmptyResponse);
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)?;
        Ok(chat_response)
    }
}

/// Default system prompt for the workspace agent
pub const DEFAULT_AGENT_SYSTEM_PROMPT: &str = r#"You are a coding assistant pair programming with the user inside a single workspace directory.

You can call tools to list directories, create and edit files, delete files and empty directories, search file contents and file names, and look things up on the web or Wikipedia.

Guidelines:
- Follow each tool's parameter schema exactly and only call tools that are listed
- Paths are always relative to the workspace root
- If a tool returns an [ERROR], read it and correct the call instead of repeating it
- Only call tools when they are needed; answer directly when you already know the answer
- When the task is complete, respond with your final answer in plain text"#;

/// Try to parse tool calls from the response content text
///
/// This handles models that output tool calls as JSON in the text
/// instead of using the native tool_calls field.
pub fn parse_tool_calls_from_text(content: &str) -> Vec<ToolCall> {
    let mut tool_calls = Vec::new();

    let content = content.trim();

    // Try parsing the entire content as a tool call
    if let Some(tool_call) = try_parse_tool_call(content) {
        tool_calls.push(tool_call);
        return tool_calls;
    }

    // Look for balanced {...} spans that might be tool calls
    let mut depth = 0usize;
    let mut start = None;

    for (i, c) in content.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        if let Some(tool_call) = try_parse_tool_call(&content[s..=i]) {
                            tool_calls.push(tool_call);
                        }
                    }
                    start = None;
                }
            }
            _ => {}
        }
    }

    tool_calls
}

/// Parse a single `{"name": ..., "arguments"|"parameters": ...}` object
fn try_parse_tool_call(json_str: &str) -> Option<ToolCall> {
    let value: Value = serde_json::from_str(json_str).ok()?;
    value.get("name").and_then(Value::as_str)?;
    if value.get("arguments").is_none() && value.get("parameters").is_none() {
        return None;
    }
    Some(ToolCall::from_value(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_with_content_only() {
        let reply = ChatResponse::from_message(json!({"role": "assistant", "content": "Done."}))
            .into_reply(false)
            .unwrap();
        assert_eq!(reply.content.as_deref(), Some("Done."));
        assert!(reply.tool_calls.is_empty());
    }

    #[test]
    fn test_reply_null_tool_calls_is_content() {
        let reply = ChatResponse::from_message(json!({"content": "Done.", "tool_calls": null}))
            .into_reply(false)
            .unwrap();
        assert!(reply.tool_calls.is_empty());
    }

    #[test]
    fn test_reply_missing_message() {
        let err = ChatResponse::default().into_reply(false).unwrap_err();
        assert_eq!(err, ReplyError::EmptyMessage);
    }

    #[test]
    fn test_reply_without_content_or_calls_is_empty() {
        let err = ChatResponse::from_message(json!({"role": "assistant", "content": ""}))
            .into_reply(false)
            .unwrap_err();
        assert_eq!(err, ReplyError::EmptyMessage);
    }

    #[test]
    fn test_reply_non_list_tool_calls() {
        let err = ChatResponse::from_message(json!({"tool_calls": "list_dir"}))
            .into_reply(false)
            .unwrap_err();
        assert!(matches!(err, ReplyError::MalformedToolCalls(_)));
    }

    #[test]
    fn test_tool_call_from_nested_and_flat_shapes() {
        let nested = ToolCall::from_value(&json!({
            "id": "call_1",
            "function": {"name": "list_dir", "arguments": {"target_file": "."}}
        }));
        assert_eq!(nested.name(), Some("list_dir"));
        assert_eq!(nested.call_id(), "call_1");
        assert_eq!(nested.function.arguments["target_file"], ".");

        let flat = ToolCall::from_value(&json!({"name": "ls", "parameters": {"path": "src"}}));
        assert_eq!(flat.name(), Some("ls"));
        assert_eq!(flat.call_id(), MISSING_TOOL_CALL_ID);
        assert_eq!(flat.function.arguments["path"], "src");

        let junk = ToolCall::from_value(&json!("not a call"));
        assert_eq!(junk.name(), None);
    }

    #[test]
    fn test_text_fallback_only_when_enabled() {
        let raw = json!({"content": "{\"name\": \"list_dir\", \"arguments\": {\"target_file\": \".\"}}"});

        let without = ChatResponse::from_message(raw.clone()).into_reply(false).unwrap();
        assert!(without.tool_calls.is_empty());

        let with = ChatResponse::from_message(raw).into_reply(true).unwrap();
        assert_eq!(with.tool_calls.len(), 1);
        assert_eq!(with.tool_calls[0].name(), Some("list_dir"));
    }

    #[test]
    fn test_parse_tool_calls_embedded_in_prose() {
        let text = r#"Let me look. {"name": "file_search", "arguments": {"query": "main"}} and then
        {"name": "grep_search", "parameters": {"query": "fn main"}}"#;
        let calls = parse_tool_calls_from_text(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name(), Some("file_search"));
        assert_eq!(calls[1].function.arguments["query"], "fn main");
    }

    #[test]
    fn test_parse_tool_calls_ignores_plain_json() {
        assert!(parse_tool_calls_from_text(r#"{"answer": 42}"#).is_empty());
        assert!(parse_tool_calls_from_text("no json } here {").is_empty());
    }

    #[test]
    fn test_message_content_serializes_as_empty_string() {
        let msg = ChatMessage::assistant_tool_calls(None, vec![ToolCall::new("list_dir", json!({}))]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"], "");
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["tool_calls"][0]["function"]["name"], "list_dir");
    }

    #[test]
    fn test_tool_message_carries_call_id() {
        let msg = ChatMessage::tool("call_7", "ok");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_7");
    }
}
