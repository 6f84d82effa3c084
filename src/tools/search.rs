//! Content and file-name search over the workspace
//!
//! Both searches walk the workspace in sorted order on a blocking thread
//! and stop at a fixed number of results.

use std::path::Path;

use async_trait::async_trait;
use glob::Pattern;
use regex::RegexBuilder;
use serde::Serialize;
use serde_json::{json, Value};
use walkdir::{DirEntry, WalkDir};

use super::{ParamSpec, Tool, ToolArgs, ToolError};
use crate::security::Workspace;

/// Most content matches returned by `grep_search`
pub const GREP_MAX_RESULTS: usize = 50;

/// Most file names returned by `file_search`
pub const FILE_SEARCH_MAX_RESULTS: usize = 10;

/// Skip version-control metadata and unreadable entries
fn is_searchable(entry: &DirEntry) -> bool {
    entry.file_name() != ".git"
}

fn workspace_files(root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(is_searchable)
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
}

fn compile_glob(name: &str, pattern: Option<&str>) -> Result<Option<Pattern>, ToolError> {
    match pattern.map(str::trim).filter(|p| !p.is_empty()) {
        None => Ok(None),
        Some(p) => Pattern::new(p)
            .map(Some)
            .map_err(|e| ToolError::InvalidArgument {
                name: name.to_string(),
                reason: e.to_string(),
            }),
    }
}

/// One matching line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrepMatch {
    pub file: String,
    pub line_number: usize,
    pub content: String,
}

/// Regex search over file contents
pub fn grep_workspace(
    workspace: &Workspace,
    query: &str,
    case_sensitive: bool,
    include: Option<&Pattern>,
    exclude: Option<&Pattern>,
) -> Result<(Vec<GrepMatch>, usize), ToolError> {
    let re = RegexBuilder::new(query)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| ToolError::InvalidArgument {
            name: "query".to_string(),
            reason: format!("invalid regex: {}", e),
        })?;

    let mut matches = Vec::new();
    let mut total = 0usize;

    for entry in workspace_files(workspace.root()) {
        let file_name = entry.file_name().to_string_lossy();
        if include.is_some_and(|p| !p.matches(&file_name)) {
            continue;
        }
        if exclude.is_some_and(|p| p.matches(&file_name)) {
            continue;
        }

        // Binary or non-UTF-8 files are skipped
        let Ok(text) = std::fs::read_to_string(entry.path()) else {
            continue;
        };

        let relative = workspace.relative(entry.path());
        for (idx, line) in text.lines().enumerate() {
            if re.is_match(line) {
                total += 1;
                if matches.len() < GREP_MAX_RESULTS {
                    matches.push(GrepMatch {
                        file: relative.clone(),
                        line_number: idx + 1,
                        content: line.trim_end().to_string(),
                    });
                }
            }
        }
    }

    Ok((matches, total))
}

/// Case-insensitive substring match on file names
pub fn find_files(workspace: &Workspace, query: &str) -> (Vec<String>, usize) {
    let needle = query.to_lowercase();
    let mut found = Vec::new();
    let mut total = 0usize;

    for entry in workspace_files(workspace.root()) {
        if entry
            .file_name()
            .to_string_lossy()
            .to_lowercase()
            .contains(&needle)
        {
            total += 1;
            if found.len() < FILE_SEARCH_MAX_RESULTS {
                found.push(workspace.relative(entry.path()));
            }
        }
    }

    (found, total)
}

// ─── grep_search ────────────────────────────────────────────────────────────

pub struct GrepSearchTool;

const GREP_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("query", "string", "Regular expression to search for"),
    ParamSpec::optional(
        "case_sensitive",
        "boolean",
        "Whether the search is case sensitive (default false)",
    ),
    ParamSpec::optional(
        "include_pattern",
        "string",
        "Glob on file names to include, e.g. '*.rs'",
    ),
    ParamSpec::optional(
        "exclude_pattern",
        "string",
        "Glob on file names to exclude",
    ),
];

#[async_trait]
impl Tool for GrepSearchTool {
    fn name(&self) -> &str {
        "grep_search"
    }

    fn description(&self) -> &str {
        "Search file contents in the workspace with a regular expression. Returns at most 50 matching lines."
    }

    fn parameters(&self) -> &[ParamSpec] {
        GREP_PARAMS
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let query = args.require_str("query")?.to_string();
        let case_sensitive = args.bool_or("case_sensitive", false);
        let include_raw = args.str("include_pattern").map(String::from);
        let exclude_raw = args.str("exclude_pattern").map(String::from);
        let include = compile_glob("include_pattern", include_raw.as_deref())?;
        let exclude = compile_glob("exclude_pattern", exclude_raw.as_deref())?;
        let workspace = args.workspace().clone();

        let pattern = query.clone();
        let (results, total) = tokio::task::spawn_blocking(move || {
            grep_workspace(
                &workspace,
                &pattern,
                case_sensitive,
                include.as_ref(),
                exclude.as_ref(),
            )
        })
        .await
        .map_err(|e| ToolError::Failed(format!("search task failed: {}", e)))??;

        Ok(json!({
            "query": query,
            "case_sensitive": case_sensitive,
            "include_pattern": include_raw,
            "exclude_pattern": exclude_raw,
            "results": results,
            "total_matches": total,
            "capped": total > GREP_MAX_RESULTS,
        }))
    }
}

// ─── file_search ────────────────────────────────────────────────────────────

pub struct FileSearchTool;

const FILE_SEARCH_PARAMS: &[ParamSpec] = &[
    ParamSpec::required("query", "string", "Part of the file name to look for"),
    ParamSpec::optional(
        "explanation",
        "string",
        "One sentence explaining why the file is needed",
    ),
];

#[async_trait]
impl Tool for FileSearchTool {
    fn name(&self) -> &str {
        "file_search"
    }

    fn description(&self) -> &str {
        "Find files in the workspace whose name contains the query (case-insensitive). Returns at most 10 paths."
    }

    fn parameters(&self) -> &[ParamSpec] {
        FILE_SEARCH_PARAMS
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let query = args.require_str("query")?.to_string();
        if query.trim().is_empty() {
            return Err(ToolError::InvalidArgument {
                name: "query".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        let workspace = args.workspace().clone();

        let needle = query.clone();
        let (results, total) =
            tokio::task::spawn_blocking(move || find_files(&workspace, &needle))
                .await
                .map_err(|e| ToolError::Failed(format!("search task failed: {}", e)))?;

        Ok(json!({
            "query": query,
            "results": results,
            "total_matches": total,
            "capped": total > FILE_SEARCH_MAX_RESULTS,
        }))
    }
}
