//! Workspace file tools: list, create/edit, delete
//!
//! Paths arrive already resolved by the executor. These tools only decide
//! what to do with a path that is known to be inside the workspace.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use tokio::fs;
use tracing::debug;

use super::{ParamSpec, Tool, ToolArgs, ToolError};

const TARGET_FILE: &str = "target_file";
const PATH_PARAMS: &[&str] = &[TARGET_FILE];

// ─── list_dir ───────────────────────────────────────────────────────────────

/// List the entries of a directory
pub struct ListDirTool;

const LIST_DIR_PARAMS: &[ParamSpec] = &[
    ParamSpec::required(
        TARGET_FILE,
        "string",
        "Directory to list, relative to the workspace root (use '.' for the root)",
    ),
    ParamSpec::optional(
        "explanation",
        "string",
        "One sentence explaining why this directory is being listed",
    ),
];

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the files and subdirectories of a directory in the workspace."
    }

    fn parameters(&self) -> &[ParamSpec] {
        LIST_DIR_PARAMS
    }

    fn path_params(&self) -> &[&'static str] {
        PATH_PARAMS
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let requested = args.require_str(TARGET_FILE)?;
        let path = args.path(TARGET_FILE)?;

        let meta = match fs::metadata(path).await {
            Ok(m) => m,
            Err(_) => {
                return Err(ToolError::Failed(format!(
                    "Path does not exist: {}",
                    requested
                )))
            }
        };
        if !meta.is_dir() {
            return Err(ToolError::Failed(format!(
                "Path is not a directory: {}",
                requested
            )));
        }

        let mut directories = Vec::new();
        let mut files = Vec::new();
        let mut entries = fs::read_dir(path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                directories.push(name);
            } else {
                files.push(name);
            }
        }
        directories.sort();
        files.sort();

        Ok(json!({
            "path": requested,
            "explanation": args.get("explanation"),
            "directories": directories,
            "files": files,
        }))
    }
}

// ─── delete_file ────────────────────────────────────────────────────────────

/// Delete a single file
pub struct DeleteFileTool;

const DELETE_FILE_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    TARGET_FILE,
    "string",
    "File to delete, relative to the workspace root",
)];

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file in the workspace. Does not delete directories."
    }

    fn parameters(&self) -> &[ParamSpec] {
        DELETE_FILE_PARAMS
    }

    fn path_params(&self) -> &[&'static str] {
        PATH_PARAMS
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let requested = args.require_str(TARGET_FILE)?;
        let path = args.path(TARGET_FILE)?;

        match fs::metadata(path).await {
            Err(_) => {
                return Err(ToolError::Failed(format!(
                    "File does not exist: {}",
                    requested
                )))
            }
            Ok(m) if !m.is_file() => {
                return Err(ToolError::Failed(format!(
                    "Path is not a file: {}",
                    requested
                )))
            }
            Ok(_) => {}
        }

        fs::remove_file(path).await.map_err(|e| {
            ToolError::Failed(format!("Failed to delete file {}: {}", requested, e))
        })?;

        Ok(json!({
            "success": true,
            "message": format!("File deleted: {}", requested),
        }))
    }
}

// ─── remove_dir ─────────────────────────────────────────────────────────────

/// Remove an empty directory
pub struct RemoveDirTool;

const REMOVE_DIR_PARAMS: &[ParamSpec] = &[ParamSpec::required(
    TARGET_FILE,
    "string",
    "Empty directory to remove, relative to the workspace root",
)];

#[async_trait]
impl Tool for RemoveDirTool {
    fn name(&self) -> &str {
        "remove_dir"
    }

    fn description(&self) -> &str {
        "Remove an empty directory from the workspace."
    }

    fn parameters(&self) -> &[ParamSpec] {
        REMOVE_DIR_PARAMS
    }

    fn path_params(&self) -> &[&'static str] {
        PATH_PARAMS
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let requested = args.require_str(TARGET_FILE)?;
        let path = args.path(TARGET_FILE)?;

        if path == args.workspace().root() {
            return Err(ToolError::Failed(
                "Refusing to remove the workspace root".to_string(),
            ));
        }

        match fs::metadata(path).await {
            Err(_) => {
                return Err(ToolError::Failed(format!(
                    "Path does not exist: {}",
                    requested
                )))
            }
            Ok(m) if !m.is_dir() => {
                return Err(ToolError::Failed(format!(
                    "Path is not a directory: {}",
                    requested
                )))
            }
            Ok(_) => {}
        }

        // Non-empty directories fail here
        fs::remove_dir(path).await.map_err(|e| {
            ToolError::Failed(format!("Failed to remove directory {}: {}", requested, e))
        })?;

        Ok(json!({
            "success": true,
            "message": format!("Directory removed: {}", requested),
        }))
    }
}

// ─── edit_or_create ─────────────────────────────────────────────────────────

/// Create a file, or edit an existing one
pub struct EditOrCreateTool;

const EDIT_PARAMS: &[ParamSpec] = &[
    ParamSpec::required(
        TARGET_FILE,
        "string",
        "File to create or modify, relative to the workspace root",
    ),
    ParamSpec::required(
        "code_edit",
        "string",
        "Content to write. Appended after a blank line if the file already has content",
    ),
    ParamSpec::optional(
        "instructions",
        "object",
        "Optional edit operation, e.g. {\"operation\": \"insert_line\", \"line_number\": 3, \"content\": \"...\"}. \
         Operations: replace_file_content, append, prepend, insert_line, replace_line, delete_line, replace_regex",
    ),
    ParamSpec::optional(
        "explanation",
        "string",
        "One sentence explaining the change",
    ),
];

/// A structured edit requested through `instructions`
#[derive(Debug, Clone, PartialEq)]
pub enum EditOperation {
    ReplaceFileContent(String),
    Append(String),
    Prepend(String),
    InsertLine { line_number: i64, content: String },
    ReplaceLine { line_number: i64, content: String },
    DeleteLine { line_number: i64 },
    ReplaceRegex {
        regex: String,
        new_content: String,
        /// 0 replaces every occurrence
        count: usize,
    },
}

impl EditOperation {
    /// Read an operation out of the `instructions` argument
    ///
    /// Returns `Ok(None)` for free-text or absent instructions.
    pub fn from_instructions(
        instructions: Option<&Value>,
        code_edit: &str,
    ) -> Result<Option<Self>, ToolError> {
        let obj = match instructions {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => map,
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };

        let Some(operation) = obj.get("operation").and_then(Value::as_str) else {
            return Ok(None);
        };

        let content = || {
            obj.get("content")
                .and_then(Value::as_str)
                .unwrap_or(code_edit)
                .to_string()
        };
        let line_number = || -> Result<i64, ToolError> {
            obj.get("line_number")
                .and_then(line_number_of)
                .ok_or_else(|| ToolError::InvalidArgument {
                    name: "instructions".to_string(),
                    reason: format!("missing 'line_number' for '{}' operation", operation),
                })
        };

        let op = match operation {
            "replace_file_content" => EditOperation::ReplaceFileContent(content()),
            "append" => EditOperation::Append(content()),
            "prepend" => EditOperation::Prepend(content()),
            "insert_line" => EditOperation::InsertLine {
                line_number: line_number()?,
                content: content(),
            },
            "replace_line" => EditOperation::ReplaceLine {
                line_number: line_number()?,
                content: content(),
            },
            "delete_line" => EditOperation::DeleteLine {
                line_number: line_number()?,
            },
            "replace_regex" => {
                let regex = obj
                    .get("regex")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolError::InvalidArgument {
                        name: "instructions".to_string(),
                        reason: "missing 'regex' for 'replace_regex' operation".to_string(),
                    })?
                    .to_string();
                let new_content = obj
                    .get("new_content")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(content);
                let count = obj.get("count").and_then(Value::as_u64).unwrap_or(0) as usize;
                EditOperation::ReplaceRegex {
                    regex,
                    new_content,
                    count,
                }
            }
            other => {
                return Err(ToolError::InvalidArgument {
                    name: "instructions".to_string(),
                    reason: format!("unsupported operation '{}'", other),
                })
            }
        };
        Ok(Some(op))
    }

    pub fn name(&self) -> &'static str {
        match self {
            EditOperation::ReplaceFileContent(_) => "replace_file_content",
            EditOperation::Append(_) => "append",
            EditOperation::Prepend(_) => "prepend",
            EditOperation::InsertLine { .. } => "insert_line",
            EditOperation::ReplaceLine { .. } => "replace_line",
            EditOperation::DeleteLine { .. } => "delete_line",
            EditOperation::ReplaceRegex { .. } => "replace_regex",
        }
    }

    /// Apply the operation to the current file content
    pub fn apply(&self, original: &str) -> Result<String, ToolError> {
        match self {
            EditOperation::ReplaceFileContent(content) => Ok(content.clone()),
            EditOperation::Append(content) => Ok(format!("{}{}", original, content)),
            EditOperation::Prepend(content) => Ok(format!("{}{}", content, original)),
            EditOperation::InsertLine {
                line_number,
                content,
            } => {
                let mut lines: Vec<String> =
                    original.split_inclusive('\n').map(String::from).collect();
                let idx = (*line_number - 1).clamp(0, lines.len() as i64) as usize;
                lines.insert(idx, with_newline(content));
                Ok(lines.concat())
            }
            EditOperation::ReplaceLine {
                line_number,
                content,
            } => {
                let mut lines: Vec<String> =
                    original.split_inclusive('\n').map(String::from).collect();
                let idx = line_index(*line_number, lines.len(), "replace_line")?;
                lines[idx] = with_newline(content);
                Ok(lines.concat())
            }
            EditOperation::DeleteLine { line_number } => {
                let mut lines: Vec<&str> = original.split_inclusive('\n').collect();
                let idx = line_index(*line_number, lines.len(), "delete_line")?;
                lines.remove(idx);
                Ok(lines.concat())
            }
            EditOperation::ReplaceRegex {
                regex,
                new_content,
                count,
            } => {
                let re = Regex::new(regex).map_err(|e| ToolError::InvalidArgument {
                    name: "instructions".to_string(),
                    reason: format!("invalid regex pattern: {}", e),
                })?;
                Ok(re
                    .replacen(original, *count, new_content.as_str())
                    .into_owned())
            }
        }
    }
}

fn line_number_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn line_index(line_number: i64, len: usize, operation: &str) -> Result<usize, ToolError> {
    if line_number >= 1 && (line_number as usize) <= len {
        Ok(line_number as usize - 1)
    } else {
        Err(ToolError::Failed(format!(
            "Line number {} out of bounds for '{}'",
            line_number, operation
        )))
    }
}

fn with_newline(content: &str) -> String {
    if content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{}\n", content)
    }
}

/// Default edit: new file gets `code_edit`, existing content gets it appended
fn merge_content(original: &str, code_edit: &str) -> String {
    if original.is_empty() {
        code_edit.to_string()
    } else if code_edit.is_empty() {
        original.to_string()
    } else {
        format!("{}\n\n{}", original.trim_end_matches('\n'), code_edit)
    }
}

#[async_trait]
impl Tool for EditOrCreateTool {
    fn name(&self) -> &str {
        "edit_or_create"
    }

    fn description(&self) -> &str {
        "Create a new file or edit an existing one in the workspace. Parent directories are created as needed."
    }

    fn parameters(&self) -> &[ParamSpec] {
        EDIT_PARAMS
    }

    fn path_params(&self) -> &[&'static str] {
        PATH_PARAMS
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let requested = args.require_str(TARGET_FILE)?.to_string();
        let path = args.path(TARGET_FILE)?.to_path_buf();
        let code_edit = match args.get("code_edit") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let operation = EditOperation::from_instructions(args.get("instructions"), &code_edit)?;

        let existing = fs::metadata(&path).await.ok();
        if existing.as_ref().is_some_and(|m| m.is_dir()) {
            return Err(ToolError::Failed(format!(
                "Path is a directory, not a file: {}",
                requested
            )));
        }
        let file_exists = existing.is_some();

        args.workspace().ensure_parent_dir(&path)?;

        let original = if file_exists {
            fs::read_to_string(&path).await?
        } else {
            String::new()
        };

        let (edited, operation_name) = match &operation {
            Some(op) => (op.apply(&original)?, op.name()),
            None => (merge_content(&original, &code_edit), "write"),
        };

        fs::write(&path, &edited).await?;
        debug!(file = %requested, operation = operation_name, bytes = edited.len(), "File written");

        let action = if file_exists { "Updated" } else { "Created" };
        let mut message = format!(
            "File {}: {} with operation '{}'.",
            action, requested, operation_name
        );
        if let Some(explanation) = args.str("explanation") {
            message.push_str(&format!(" Explanation: {}", explanation));
        }

        let mut result = Map::new();
        result.insert("success".into(), Value::Bool(true));
        result.insert("message".into(), Value::String(message));
        Ok(Value::Object(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Workspace;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<Workspace>) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::new(dir.path()).unwrap());
        (dir, ws)
    }

    fn args(ws: &Arc<Workspace>, values: Value) -> ToolArgs {
        let values = values.as_object().cloned().unwrap();
        let mut paths = HashMap::new();
        if let Some(target) = values.get(TARGET_FILE).and_then(Value::as_str) {
            paths.insert(TARGET_FILE.to_string(), ws.resolve(target).unwrap());
        }
        ToolArgs::new(values, paths, Arc::clone(ws))
    }

    #[tokio::test]
    async fn test_list_dir_sorted() {
        let (dir, ws) = setup();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();

        let out = ListDirTool
            .invoke(args(&ws, json!({"target_file": "."})))
            .await
            .unwrap();
        assert_eq!(out["files"], json!(["a.txt", "b.txt"]));
        assert_eq!(out["directories"], json!(["src"]));
    }

    #[tokio::test]
    async fn test_list_dir_missing_and_not_dir() {
        let (dir, ws) = setup();
        std::fs::write(dir.path().join("f.txt"), "").unwrap();

        let missing = ListDirTool
            .invoke(args(&ws, json!({"target_file": "nope"})))
            .await
            .unwrap_err();
        assert!(missing.to_string().contains("does not exist"));

        let not_dir = ListDirTool
            .invoke(args(&ws, json!({"target_file": "f.txt"})))
            .await
            .unwrap_err();
        assert!(not_dir.to_string().contains("not a directory"));
    }

    #[tokio::test]
    async fn test_create_then_append() {
        let (dir, ws) = setup();
        let out = EditOrCreateTool
            .invoke(args(&ws, json!({"target_file": "deep/dir/a.md", "code_edit": "one"})))
            .await
            .unwrap();
        assert!(out["message"].as_str().unwrap().starts_with("File Created"));

        let out = EditOrCreateTool
            .invoke(args(&ws, json!({"target_file": "deep/dir/a.md", "code_edit": "two"})))
            .await
            .unwrap();
        assert!(out["message"].as_str().unwrap().starts_with("File Updated"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("deep/dir/a.md")).unwrap(),
            "one\n\ntwo"
        );
    }

    #[tokio::test]
    async fn test_empty_edit_leaves_existing_file_alone() {
        let (dir, ws) = setup();
        std::fs::write(dir.path().join("keep.txt"), "data\n").unwrap();
        EditOrCreateTool
            .invoke(args(&ws, json!({"target_file": "keep.txt", "code_edit": ""})))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("keep.txt")).unwrap(),
            "data\n"
        );
    }

    #[tokio::test]
    async fn test_operations_on_lines() {
        let (dir, ws) = setup();
        let file = dir.path().join("lines.txt");
        std::fs::write(&file, "a\nb\nc\n").unwrap();

        EditOrCreateTool
            .invoke(args(
                &ws,
                json!({
                    "target_file": "lines.txt",
                    "code_edit": "",
                    "instructions": {"operation": "insert_line", "line_number": 2, "content": "x"}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "a\nx\nb\nc\n");

        EditOrCreateTool
            .invoke(args(
                &ws,
                json!({
                    "target_file": "lines.txt",
                    "code_edit": "",
                    "instructions": {"operation": "replace_line", "line_number": 1, "content": "A"}
                }),
            ))
            .await
            .unwrap();
        EditOrCreateTool
            .invoke(args(
                &ws,
                json!({
                    "target_file": "lines.txt",
                    "code_edit": "",
                    "instructions": {"operation": "delete_line", "line_number": 4}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "A\nx\nb\n");
    }

    #[test]
    fn test_operation_content_falls_back_to_code_edit() {
        let op = EditOperation::from_instructions(Some(&json!({"operation": "append"})), "tail")
            .unwrap()
            .unwrap();
        assert_eq!(op, EditOperation::Append("tail".to_string()));
        assert_eq!(op.apply("head ").unwrap(), "head tail");
    }

    #[test]
    fn test_free_text_instructions_are_not_an_operation() {
        let op = EditOperation::from_instructions(Some(&json!("make it nicer")), "x").unwrap();
        assert!(op.is_none());
    }

    #[test]
    fn test_replace_regex_count() {
        let op = EditOperation::ReplaceRegex {
            regex: "o".to_string(),
            new_content: "0".to_string(),
            count: 1,
        };
        assert_eq!(op.apply("foo boo").unwrap(), "f0o boo");

        let all = EditOperation::ReplaceRegex {
            regex: "o".to_string(),
            new_content: "0".to_string(),
            count: 0,
        };
        assert_eq!(all.apply("foo boo").unwrap(), "f00 b00");
    }

    #[test]
    fn test_line_out_of_bounds() {
        let op = EditOperation::DeleteLine { line_number: 9 };
        assert!(op.apply("one\n").is_err());
    }

    #[test]
    fn test_unknown_operation_rejected() {
        let err = EditOperation::from_instructions(Some(&json!({"operation": "explode"})), "")
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_delete_file_and_remove_dir() {
        let (dir, ws) = setup();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        std::fs::create_dir(dir.path().join("full")).unwrap();
        std::fs::write(dir.path().join("full/x"), "").unwrap();

        assert!(DeleteFileTool
            .invoke(args(&ws, json!({"target_file": "empty"})))
            .await
            .is_err());

        DeleteFileTool
            .invoke(args(&ws, json!({"target_file": "full/x"})))
            .await
            .unwrap();
        assert!(!dir.path().join("full/x").exists());

        RemoveDirTool
            .invoke(args(&ws, json!({"target_file": "empty"})))
            .await
            .unwrap();
        assert!(!dir.path().join("empty").exists());

        std::fs::write(dir.path().join("full/y"), "").unwrap();
        assert!(RemoveDirTool
            .invoke(args(&ws, json!({"target_file": "full"})))
            .await
            .is_err());

        assert!(RemoveDirTool
            .invoke(args(&ws, json!({"target_file": "."})))
            .await
            .is_err());
    }
}
