//! Tools the model can call, and the machinery around them
//!
//! # Architecture
//!
//! ```text
//! ToolCall (from model)
//!      │
//!      ▼
//! ToolExecutor ── RedirectTable ("touch" → "edit_or_create", path → target_file)
//!      │
//!      ├── Workspace::resolve (every path parameter)
//!      │
//!      ▼
//! ToolRegistry ── Arc<dyn Tool> ── invoke(ToolArgs) → JSON value
//!      │
//!      ▼
//! String result → tool-role message
//! ```
//!
//! Every tool implements the same [`Tool`] interface, so argument filtering,
//! sandboxing and error reporting happen once in the executor instead of in
//! each tool.

pub mod chat;
pub mod executor;
pub mod files;
pub mod redirects;
pub mod search;
pub mod web;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::ollama::{ToolFunction, ToolSchema};
use crate::security::{SandboxError, Workspace};

pub use chat::ChatTool;
pub use executor::{ErrorKind, ExecutionResult, ToolExecutor};
pub use files::{DeleteFileTool, EditOrCreateTool, ListDirTool, RemoveDirTool};
pub use redirects::{KeyAlias, RedirectEntry, RedirectError, RedirectTable, Redirected};
pub use search::{FileSearchTool, GrepSearchTool};
pub use web::{WebSearchTool, WikiSearchTool};

/// One declared parameter of a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    /// JSON schema type ("string", "integer", "boolean", "object", ...)
    pub param_type: &'static str,
    pub description: &'static str,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(
        name: &'static str,
        param_type: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            param_type,
            description,
            required: true,
        }
    }

    pub const fn optional(
        name: &'static str,
        param_type: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            param_type,
            description,
            required: false,
        }
    }
}

/// Error type for tool invocations
#[derive(Debug)]
pub enum ToolError {
    /// A required argument was not supplied
    MissingArgument(String),
    /// An argument was supplied with an unusable value
    InvalidArgument { name: String, reason: String },
    /// The tool ran and failed
    Failed(String),
    Io(io::Error),
    Sandbox(SandboxError),
    Http(reqwest::Error),
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolError::MissingArgument(name) => write!(f, "Missing required argument '{}'", name),
            ToolError::InvalidArgument { name, reason } => {
                write!(f, "Invalid argument '{}': {}", name, reason)
            }
            ToolError::Failed(msg) => write!(f, "{}", msg),
            ToolError::Io(e) => write!(f, "I/O error: {}", e),
            ToolError::Sandbox(e) => write!(f, "{}", e),
            ToolError::Http(e) => write!(f, "HTTP error: {}", e),
        }
    }
}

impl std::error::Error for ToolError {}

impl From<io::Error> for ToolError {
    fn from(e: io::Error) -> Self {
        ToolError::Io(e)
    }
}

impl From<SandboxError> for ToolError {
    fn from(e: SandboxError) -> Self {
        ToolError::Sandbox(e)
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        ToolError::Http(e)
    }
}

/// Arguments handed to a tool after filtering and sandboxing
///
/// Only declared parameters are present. Path parameters have already been
/// resolved inside the workspace; tools read them through [`ToolArgs::path`]
/// and never join paths themselves.
#[derive(Debug, Clone)]
pub struct ToolArgs {
    values: Map<String, Value>,
    paths: HashMap<String, PathBuf>,
    workspace: Arc<Workspace>,
}

impl ToolArgs {
    pub fn new(
        values: Map<String, Value>,
        paths: HashMap<String, PathBuf>,
        workspace: Arc<Workspace>,
    ) -> Self {
        Self {
            values,
            paths,
            workspace,
        }
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Raw value, treating JSON null as absent
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    /// String value if present and a string
    pub fn str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn require_str(&self, key: &str) -> Result<&str, ToolError> {
        match self.get(key) {
            None => Err(ToolError::MissingArgument(key.to_string())),
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(ToolError::InvalidArgument {
                name: key.to_string(),
                reason: format!("expected a string, got {}", other),
            }),
        }
    }

    /// Boolean value; also accepts "true"/"false" strings
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => default,
        }
    }

    /// Resolved absolute path of a path parameter
    pub fn path(&self, key: &str) -> Result<&Path, ToolError> {
        self.paths
            .get(key)
            .map(PathBuf::as_path)
            .ok_or_else(|| ToolError::MissingArgument(key.to_string()))
    }
}

/// A capability the model can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    /// Canonical name (used in function calling)
    fn name(&self) -> &str;

    /// Human-readable description shown to the model
    fn description(&self) -> &str;

    /// Declared parameters; anything else the model sends is dropped
    fn parameters(&self) -> &[ParamSpec];

    /// Parameters holding workspace-relative paths
    fn path_params(&self) -> &[&'static str] {
        &[]
    }

    /// Run the tool
    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError>;

    fn required_params(&self) -> Vec<&'static str> {
        self.parameters()
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect()
    }

    /// Function-calling schema sent to the model
    fn schema(&self) -> ToolSchema {
        let mut properties = Map::new();
        for param in self.parameters() {
            properties.insert(
                param.name.to_string(),
                json!({
                    "type": param.param_type,
                    "description": param.description,
                }),
            );
        }

        ToolSchema {
            tool_type: "function".to_string(),
            function: ToolFunction {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": properties,
                    "required": self.required_params(),
                }),
            },
        }
    }
}

/// Append-only table of tools keyed by canonical name
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// File, search and web tools
    ///
    /// The `chat` tool needs a model backend and is registered separately.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ListDirTool));
        registry.register(Arc::new(EditOrCreateTool));
        registry.register(Arc::new(DeleteFileTool));
        registry.register(Arc::new(RemoveDirTool));
        registry.register(Arc::new(GrepSearchTool));
        registry.register(Arc::new(FileSearchTool));
        registry.register(Arc::new(WebSearchTool::new()));
        registry.register(Arc::new(WikiSearchTool::new()));
        registry
    }

    /// Add a tool; a second tool with the same name is refused
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            warn!(tool = %name, "Tool already registered, ignoring duplicate");
            return false;
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Schemas for every tool, in registration order
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
