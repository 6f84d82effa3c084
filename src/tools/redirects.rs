//! Redirects from invented tool names to registered ones
//!
//! Models regularly call tools that do not exist ("touch", "create_file",
//! "ls") with argument names of their own choosing ("path", "content").
//! Each redirect entry declares the canonical tool it stands for and
//! exactly which argument keys map onto which canonical keys. Nothing is
//! guessed beyond the declared aliases.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Argument keys that all mean the same canonical key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyAlias {
    pub canonical: &'static str,
    /// Checked in order; the first one present wins
    pub aliases: &'static [&'static str],
}

/// One alias tool name and how to adapt its arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectEntry {
    pub alias: &'static str,
    pub canonical: &'static str,
    pub key_aliases: &'static [KeyAlias],
    /// Canonical path key that must be present after mapping
    pub required_path: Option<&'static str>,
    /// Values synthesized when the model left a key out
    pub defaults: &'static [(&'static str, &'static str)],
}

impl RedirectEntry {
    /// Rewrite `args` into the canonical tool's vocabulary
    pub fn adapt(&self, mut args: Map<String, Value>) -> Result<Map<String, Value>, RedirectError> {
        for mapping in self.key_aliases {
            let canonical_present = args
                .get(mapping.canonical)
                .is_some_and(|v| !v.is_null());

            let mut found = None;
            for alias in mapping.aliases {
                if let Some(value) = args.remove(*alias) {
                    if found.is_none() && !value.is_null() {
                        found = Some(value);
                    }
                }
            }

            if !canonical_present {
                if let Some(value) = found {
                    args.insert(mapping.canonical.to_string(), value);
                }
            }
        }

        for (key, value) in self.defaults {
            let missing = args.get(*key).map_or(true, Value::is_null);
            if missing {
                args.insert((*key).to_string(), Value::String((*value).to_string()));
            }
        }

        if let Some(path_key) = self.required_path {
            let has_path = match args.get(path_key) {
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(Value::Null) | None => false,
                Some(_) => true,
            };
            if !has_path {
                return Err(RedirectError::MissingPath {
                    alias: self.alias.to_string(),
                    canonical: self.canonical.to_string(),
                    key: path_key.to_string(),
                });
            }
        }

        Ok(args)
    }
}

/// A redirect that could not be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectError {
    MissingPath {
        alias: String,
        canonical: String,
        key: String,
    },
}

impl std::fmt::Display for RedirectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RedirectError::MissingPath {
                alias,
                canonical,
                key,
            } => write!(
                f,
                "'{}' (redirected to '{}') needs a file path in '{}'",
                alias, canonical, key
            ),
        }
    }
}

impl std::error::Error for RedirectError {}

/// Result of looking a call up in the redirect table
#[derive(Debug, Clone, PartialEq)]
pub struct Redirected {
    /// Name to look up in the registry
    pub name: String,
    pub args: Map<String, Value>,
    /// Original name when a redirect was applied
    pub redirected_from: Option<String>,
}

/// Static alias → canonical table, consulted before registry lookup
#[derive(Debug, Clone, Default)]
pub struct RedirectTable {
    entries: HashMap<&'static str, RedirectEntry>,
}

const FILE_PATH: KeyAlias = KeyAlias {
    canonical: "target_file",
    aliases: &["path", "filename", "file", "file_path", "filepath", "file_name"],
};

const DIR_PATH: KeyAlias = KeyAlias {
    canonical: "target_file",
    aliases: &[
        "path",
        "directory",
        "dir",
        "folder",
        "relative_workspace_path",
    ],
};

const FILE_CONTENT: KeyAlias = KeyAlias {
    canonical: "code_edit",
    aliases: &["content", "text", "code", "contents", "body"],
};

const GREP_QUERY: KeyAlias = KeyAlias {
    canonical: "query",
    aliases: &["pattern", "regex", "search", "term"],
};

const FILE_QUERY: KeyAlias = KeyAlias {
    canonical: "query",
    aliases: &["name", "filename", "pattern", "search"],
};

const WEB_QUERY: KeyAlias = KeyAlias {
    canonical: "query",
    aliases: &["q", "search", "term", "text", "topic"],
};

const EDIT_DEFAULTS: &[(&str, &str)] = &[
    ("instructions", "Write the provided content to the file."),
    ("explanation", "No explanation provided."),
];

const OPEN_DEFAULTS: &[(&str, &str)] = &[
    ("code_edit", ""),
    ("instructions", "Create the file if it does not exist."),
    ("explanation", "No explanation provided."),
];

fn edit_redirect(alias: &'static str) -> RedirectEntry {
    RedirectEntry {
        alias,
        canonical: "edit_or_create",
        key_aliases: &[FILE_PATH, FILE_CONTENT],
        required_path: Some("target_file"),
        defaults: EDIT_DEFAULTS,
    }
}

fn simple_redirect(
    alias: &'static str,
    canonical: &'static str,
    key_aliases: &'static [KeyAlias],
    required_path: Option<&'static str>,
) -> RedirectEntry {
    RedirectEntry {
        alias,
        canonical,
        key_aliases,
        required_path,
        defaults: &[],
    }
}

impl RedirectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The redirects shipped with toolpilot
    pub fn builtin() -> Self {
        let mut table = Self::new();

        for alias in ["touch", "create_file", "write_file", "edit_file"] {
            table.insert(edit_redirect(alias));
        }
        table.insert(RedirectEntry {
            alias: "open",
            canonical: "edit_or_create",
            key_aliases: &[FILE_PATH, FILE_CONTENT],
            required_path: Some("target_file"),
            defaults: OPEN_DEFAULTS,
        });

        for alias in ["ls", "list_files", "list_directory", "read_dir"] {
            table.insert(RedirectEntry {
                alias,
                canonical: "list_dir",
                key_aliases: &[DIR_PATH],
                required_path: None,
                defaults: &[("target_file", ".")],
            });
        }

        for alias in ["rm", "remove_file"] {
            table.insert(simple_redirect(alias, "delete_file", &[FILE_PATH], Some("target_file")));
        }
        for alias in ["rmdir", "delete_folder", "delete_dir"] {
            table.insert(simple_redirect(alias, "remove_dir", &[DIR_PATH], Some("target_file")));
        }

        for alias in ["grep", "search_code"] {
            table.insert(simple_redirect(alias, "grep_search", &[GREP_QUERY], None));
        }
        for alias in ["find_file", "search_files"] {
            table.insert(simple_redirect(alias, "file_search", &[FILE_QUERY], None));
        }
        for alias in ["search_web", "google"] {
            table.insert(simple_redirect(alias, "web_search", &[WEB_QUERY], None));
        }
        table.insert(simple_redirect("wikipedia", "wiki_search", &[WEB_QUERY], None));

        table
    }

    /// Add or replace an entry
    pub fn insert(&mut self, entry: RedirectEntry) {
        self.entries.insert(entry.alias, entry);
    }

    pub fn get(&self, alias: &str) -> Option<&RedirectEntry> {
        self.entries.get(alias)
    }

    /// Canonical name for `name`; names without an entry map to themselves
    pub fn resolve_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.entries.get(name).map_or(name, |e| e.canonical)
    }

    /// Apply the redirect for `name`, if there is one
    pub fn apply(&self, name: &str, args: Map<String, Value>) -> Result<Redirected, RedirectError> {
        match self.entries.get(name) {
            Some(entry) => Ok(Redirected {
                name: entry.canonical.to_string(),
                args: entry.adapt(args)?,
                redirected_from: Some(name.to_string()),
            }),
            None => Ok(Redirected {
                name: name.to_string(),
                args,
                redirected_from: None,
            }),
        }
    }

    pub fn aliases(&self) -> impl Iterator<Item = &RedirectEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
