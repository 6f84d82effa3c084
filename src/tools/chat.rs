//! `chat` tool: a plain conversational reply from the model, no tools

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ParamSpec, Tool, ToolArgs, ToolError};
use crate::ollama::{ChatMessage, ChatRequest, ModelBackend};

pub struct ChatTool {
    backend: Arc<dyn ModelBackend>,
    model: String,
}

impl ChatTool {
    pub fn new(backend: Arc<dyn ModelBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }
}

const CHAT_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    "text",
    "string",
    "Message to answer conversationally",
)];

#[async_trait]
impl Tool for ChatTool {
    fn name(&self) -> &str {
        "chat"
    }

    fn description(&self) -> &str {
        "Answer a message conversationally without using any other tool."
    }

    fn parameters(&self) -> &[ParamSpec] {
        CHAT_PARAMS
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let text = args.require_str("text")?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(text)],
            tools: None,
        };
        let response = self
            .backend
            .chat(request)
            .await
            .map_err(|e| ToolError::Failed(format!("Model request failed: {}", e)))?;

        let reply = response
            .into_reply(false)
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        Ok(json!({ "response": reply.content.unwrap_or_default() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ollama::{ChatError, ChatResponse};
    use crate::security::Workspace;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct CannedBackend {
        seen: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl ModelBackend for CannedBackend {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
            self.seen.lock().unwrap().push(request);
            Ok(ChatResponse::from_message(
                json!({"role": "assistant", "content": "hi there"}),
            ))
        }
    }

    #[tokio::test]
    async fn test_chat_calls_backend_without_tools() {
        let backend = Arc::new(CannedBackend {
            seen: Mutex::new(Vec::new()),
        });
        let tool = ChatTool::new(backend.clone(), "llama3.1");

        let dir = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::new(dir.path()).unwrap());
        let mut values = serde_json::Map::new();
        values.insert("text".into(), json!("hello"));

        let out = tool
            .invoke(ToolArgs::new(values, HashMap::new(), ws))
            .await
            .unwrap();
        assert_eq!(out["response"], "hi there");

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].tools.is_none());
        assert_eq!(seen[0].model, "llama3.1");
    }
}
