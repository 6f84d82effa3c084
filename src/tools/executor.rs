//! Tool Executor - turns one model tool call into one result string
//!
//! The executor never fails outward. Whatever the model sends, the caller
//! gets a string to put in a tool-role message: the tool's output on
//! success, or `[ERROR] CODE: message` so the model can correct itself.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info_span, warn, Instrument};

use super::{RedirectTable, ToolArgs, ToolError, ToolRegistry};
use crate::metrics::AGENT_TOOL_CALLS;
use crate::ollama::ToolCall;
use crate::security::{SandboxError, Workspace};

/// Categories of tool call failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No usable tool name
    InvalidFormat,
    /// Arguments were not a JSON object or decodable JSON string
    ArgsParse,
    /// A redirect needed a file path and none was supplied
    MissingPath,
    /// A path argument resolved outside the workspace
    UnsafePath,
    UnknownTool,
    /// Required arguments missing or of the wrong type
    ArgMismatch,
    /// The tool ran and failed
    ToolException,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidFormat => "ERROR_INVALID_FORMAT",
            ErrorKind::ArgsParse => "ERROR_ARGS_PARSE",
            ErrorKind::MissingPath => "ERROR_MISSING_PATH",
            ErrorKind::UnsafePath => "ERROR_UNSAFE_PATH",
            ErrorKind::UnknownTool => "ERROR_UNKNOWN_TOOL",
            ErrorKind::ArgMismatch => "ERROR_ARG_MISMATCH",
            ErrorKind::ToolException => "ERROR_TOOL_EXCEPTION",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of executing one tool call
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Success(String),
    Failure { kind: ErrorKind, message: String },
}

impl ExecutionResult {
    fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        ExecutionResult::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success(_))
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ExecutionResult::Success(_) => None,
            ExecutionResult::Failure { kind, .. } => Some(*kind),
        }
    }

    /// Text placed in the tool-role message
    pub fn into_text(self) -> String {
        match self {
            ExecutionResult::Success(text) => text,
            ExecutionResult::Failure { kind, message } => {
                format!("[ERROR] {}: {}", kind.code(), message)
            }
        }
    }
}

/// Executes model tool calls against a registry inside a workspace
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    redirects: Arc<RedirectTable>,
    workspace: Arc<Workspace>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, redirects: RedirectTable, workspace: Workspace) -> Self {
        Self {
            registry: Arc::new(registry),
            redirects: Arc::new(redirects),
            workspace: Arc::new(workspace),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Execute a call and return the text for the tool-role message
    pub async fn execute(&self, call: &ToolCall) -> String {
        self.execute_detailed(call).await.into_text()
    }

    /// Execute a call, keeping the error category
    pub async fn execute_detailed(&self, call: &ToolCall) -> ExecutionResult {
        let name = call.name().unwrap_or("");
        let span = info_span!(
            "tool_call",
            tool = %name,
            call_id = %call.call_id(),
            otel.name = "tool_call"
        );

        async {
            let (label, result) = self.run(call).await;
            let status = result.error_kind().map_or("ok", |k| k.code());
            AGENT_TOOL_CALLS
                .with_label_values(&[label.as_str(), status])
                .inc();

            match &result {
                ExecutionResult::Success(text) => {
                    debug!(tool = %label, bytes = text.len(), "Tool call succeeded")
                }
                ExecutionResult::Failure { kind, message } => {
                    warn!(tool = %label, code = kind.code(), error = %message, "Tool call failed")
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Returns the canonical name (for metrics) and the result
    async fn run(&self, call: &ToolCall) -> (String, ExecutionResult) {
        let name = match call.name().map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => {
                return (
                    "<invalid>".to_string(),
                    ExecutionResult::failure(
                        ErrorKind::InvalidFormat,
                        "Tool call has no function name",
                    ),
                )
            }
        };

        let raw_args = match parse_arguments(&call.function.arguments) {
            Ok(args) => args,
            Err(msg) => return (name, ExecutionResult::failure(ErrorKind::ArgsParse, msg)),
        };

        let redirected = match self.redirects.apply(&name, raw_args) {
            Ok(r) => r,
            Err(e) => {
                return (
                    name,
                    ExecutionResult::failure(ErrorKind::MissingPath, e.to_string()),
                )
            }
        };
        if let Some(from) = &redirected.redirected_from {
            debug!(from = %from, to = %redirected.name, "Redirected tool call");
        }

        let canonical = redirected.name;
        let Some(tool) = self.registry.get(&canonical) else {
            let available = self.registry.names().join(", ");
            let result = ExecutionResult::failure(
                ErrorKind::UnknownTool,
                format!("Unknown tool '{}'. Available tools: {}", canonical, available),
            );
            return (canonical, result);
        };

        let values = filter_arguments(redirected.args, tool.parameters().iter().map(|p| p.name));

        let mut paths = HashMap::new();
        for key in tool.path_params() {
            let Some(value) = values.get(*key).filter(|v| !v.is_null()) else {
                continue;
            };
            let Some(raw) = value.as_str() else {
                let result = ExecutionResult::failure(
                    ErrorKind::ArgMismatch,
                    format!("Argument '{}' must be a string path", key),
                );
                return (canonical, result);
            };
            match self.workspace.resolve(raw) {
                Ok(resolved) => {
                    paths.insert((*key).to_string(), resolved);
                }
                Err(e @ (SandboxError::Escapes { .. } | SandboxError::Invalid(_))) => {
                    return (
                        canonical,
                        ExecutionResult::failure(ErrorKind::UnsafePath, e.to_string()),
                    )
                }
                Err(e) => {
                    return (
                        canonical,
                        ExecutionResult::failure(ErrorKind::ToolException, e.to_string()),
                    )
                }
            }
        }

        let missing: Vec<&str> = tool
            .required_params()
            .into_iter()
            .filter(|p| values.get(*p).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            let result = ExecutionResult::failure(
                ErrorKind::ArgMismatch,
                format!(
                    "Missing required argument(s) for '{}': {}",
                    canonical,
                    missing.join(", ")
                ),
            );
            return (canonical, result);
        }

        let args = ToolArgs::new(values, paths, Arc::clone(&self.workspace));

        // A panicking tool must not take the turn down with it
        let invocation = tokio::spawn(async move { tool.invoke(args).await }).await;

        let result = match invocation {
            Ok(Ok(value)) => ExecutionResult::Success(normalize_output(value)),
            Ok(Err(e @ (ToolError::MissingArgument(_) | ToolError::InvalidArgument { .. }))) => {
                ExecutionResult::failure(ErrorKind::ArgMismatch, e.to_string())
            }
            Ok(Err(e)) => ExecutionResult::failure(ErrorKind::ToolException, e.to_string()),
            Err(join_err) => ExecutionResult::failure(
                ErrorKind::ToolException,
                format!("Tool '{}' crashed: {}", canonical, join_err),
            ),
        };
        (canonical, result)
    }
}

/// Decode the model's arguments into a JSON object
///
/// Accepts an object, a JSON-encoded object string, or nothing at all.
pub fn parse_arguments(raw: &Value) -> Result<Map<String, Value>, String> {
    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        Value::String(s) if s.trim().is_empty() => Ok(Map::new()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(format!(
                "Arguments must be a JSON object, got {}",
                json_type(&other)
            )),
            Err(e) => Err(format!("Arguments are not valid JSON: {}", e)),
        },
        other => Err(format!(
            "Arguments must be a JSON object, got {}",
            json_type(other)
        )),
    }
}

/// Keep only keys the tool declares
pub fn filter_arguments<'a>(
    mut args: Map<String, Value>,
    declared: impl Iterator<Item = &'a str>,
) -> Map<String, Value> {
    let declared: Vec<&str> = declared.collect();
    args.retain(|key, _| declared.contains(&key.as_str()));
    args
}

/// Tool output as the string the model sees
pub fn normalize_output(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        other => serde_json::to_string(&other).unwrap_or_else(|_| other.to_string()),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ParamSpec, Tool};
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "explode"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        fn parameters(&self) -> &[ParamSpec] {
            &[]
        }

        async fn invoke(&self, _args: ToolArgs) -> Result<Value, ToolError> {
            panic!("boom");
        }
    }

    fn executor() -> (TempDir, ToolExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path()).unwrap();
        let mut registry = ToolRegistry::with_builtin_tools();
        registry.register(Arc::new(PanicTool));
        (
            dir,
            ToolExecutor::new(registry, RedirectTable::builtin(), workspace),
        )
    }

    fn kind_of(result: &ExecutionResult) -> Option<ErrorKind> {
        result.error_kind()
    }

    #[test]
    fn test_parse_arguments_shapes() {
        assert!(parse_arguments(&json!({"a": 1})).unwrap().contains_key("a"));
        assert!(parse_arguments(&Value::Null).unwrap().is_empty());
        assert!(parse_arguments(&json!("")).unwrap().is_empty());
        assert_eq!(parse_arguments(&json!("{\"a\": 2}")).unwrap()["a"], 2);
        assert!(parse_arguments(&json!("{not json")).is_err());
        assert!(parse_arguments(&json!("[1,2]")).is_err());
        assert!(parse_arguments(&json!(42)).is_err());
    }

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output(json!("plain")), "plain");
        assert_eq!(normalize_output(json!(3)), "3");
        assert_eq!(normalize_output(json!({"k": "v"})), r#"{"k":"v"}"#);
    }

    #[tokio::test]
    async fn test_missing_name_is_invalid_format() {
        let (_dir, exec) = executor();
        let call = ToolCall::from_value(&json!({"function": {"arguments": {}}}));
        let result = exec.execute_detailed(&call).await;
        assert_eq!(kind_of(&result), Some(ErrorKind::InvalidFormat));
        assert!(result.into_text().starts_with("[ERROR] ERROR_INVALID_FORMAT:"));
    }

    #[tokio::test]
    async fn test_bad_argument_string_is_args_parse() {
        let (_dir, exec) = executor();
        let call = ToolCall::new("list_dir", json!("{oops"));
        let result = exec.execute_detailed(&call).await;
        assert_eq!(kind_of(&result), Some(ErrorKind::ArgsParse));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (_dir, exec) = executor();
        let call = ToolCall::new("launch_rockets", json!({}));
        let text = exec.execute(&call).await;
        assert!(text.starts_with("[ERROR] ERROR_UNKNOWN_TOOL:"));
        assert!(text.contains("launch_rockets"));
    }

    #[tokio::test]
    async fn test_redirect_without_path_is_missing_path() {
        let (_dir, exec) = executor();
        let call = ToolCall::new("create_file", json!({"content": "x"}));
        let result = exec.execute_detailed(&call).await;
        assert_eq!(kind_of(&result), Some(ErrorKind::MissingPath));
    }

    #[tokio::test]
    async fn test_escaping_path_is_refused_before_io() {
        let (dir, exec) = executor();
        let outside = dir.path().parent().unwrap().join("escaped.txt");
        let call = ToolCall::new(
            "edit_or_create",
            json!({"target_file": "../escaped.txt", "code_edit": "nope"}),
        );
        let result = exec.execute_detailed(&call).await;
        assert_eq!(kind_of(&result), Some(ErrorKind::UnsafePath));
        assert!(!outside.exists());
    }

    #[tokio::test]
    async fn test_missing_required_is_arg_mismatch() {
        let (_dir, exec) = executor();
        let call = ToolCall::new("edit_or_create", json!({"code_edit": "x"}));
        let result = exec.execute_detailed(&call).await;
        assert_eq!(kind_of(&result), Some(ErrorKind::ArgMismatch));
    }

    #[tokio::test]
    async fn test_non_string_path_is_arg_mismatch() {
        let (_dir, exec) = executor();
        let call = ToolCall::new("list_dir", json!({"target_file": 7}));
        let result = exec.execute_detailed(&call).await;
        assert_eq!(kind_of(&result), Some(ErrorKind::ArgMismatch));
    }

    #[tokio::test]
    async fn test_panicking_tool_is_contained() {
        let (_dir, exec) = executor();
        let call = ToolCall::new("explode", json!({}));
        let result = exec.execute_detailed(&call).await;
        assert_eq!(kind_of(&result), Some(ErrorKind::ToolException));
    }

    #[tokio::test]
    async fn test_extra_arguments_are_dropped() {
        let (dir, exec) = executor();
        let call = ToolCall::new(
            "edit_or_create",
            json!({
                "target_file": "a.txt",
                "code_edit": "hello",
                "mode": "0777",
                "owner": "root"
            }),
        );
        let result = exec.execute_detailed(&call).await;
        assert!(result.is_success(), "{:?}", result);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "hello"
        );
    }

    #[tokio::test]
    async fn test_redirected_touch_creates_file() {
        let (dir, exec) = executor();
        let call = ToolCall::new("touch", json!({"path": "notes/todo.md", "content": "- a"}));
        let result = exec.execute_detailed(&call).await;
        assert!(result.is_success(), "{:?}", result);
        assert!(dir.path().join("notes/todo.md").is_file());
    }
}
