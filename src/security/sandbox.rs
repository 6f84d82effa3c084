//! Workspace sandbox: every path a tool touches is resolved here first
//!
//! The model names files relative to the workspace root. Before any I/O
//! happens the path is joined onto the root, normalized, and required to
//! stay under the root.
//!
//! ```text
//!   root = /home/me/workspace
//!
//!   "src/main.rs"          → /home/me/workspace/src/main.rs      ✓
//!   "a/../b.txt"           → /home/me/workspace/b.txt            ✓
//!   "../secrets.txt"       → /home/me/secrets.txt                ✗ rejected
//!   "link/x" (link → /etc) → /etc/x                              ✗ rejected
//! ```
//!
//! Normalization is lexical for components that do not exist yet (a file
//! about to be created) and goes through `canonicalize` for the longest
//! existing prefix, so a symlink inside the workspace cannot be used to
//! step outside it. Dangling links are followed by hand to where a write
//! through them would land.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Reasons a path is refused
#[derive(Debug)]
pub enum SandboxError {
    /// The resolved path is not under the workspace root
    Escapes { requested: String, resolved: PathBuf },
    /// The path was empty or otherwise unusable
    Invalid(String),
    /// Filesystem error while canonicalizing or creating directories
    Io(io::Error),
}

impl std::fmt::Display for SandboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxError::Escapes { requested, .. } => {
                write!(f, "Path '{}' resolves outside of the workspace", requested)
            }
            SandboxError::Invalid(msg) => write!(f, "Invalid path: {}", msg),
            SandboxError::Io(e) => write!(f, "Filesystem error: {}", e),
        }
    }
}

impl std::error::Error for SandboxError {}

impl From<io::Error> for SandboxError {
    fn from(e: io::Error) -> Self {
        SandboxError::Io(e)
    }
}

/// A workspace root that tool paths are confined to
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Canonical absolute root
    root: PathBuf,
}

impl Workspace {
    /// Open a workspace rooted at `root`
    ///
    /// The directory must exist; it is canonicalized once here so every
    /// later containment check compares against the real path.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = fs::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("workspace root is not a directory: {}", root.display()),
            ));
        }
        Ok(Self { root })
    }

    /// Create the root directory if needed, then open it
    pub fn create(root: impl AsRef<Path>) -> io::Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        Self::new(root)
    }

    /// Canonical workspace root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a caller-supplied path against the root
    ///
    /// Returns the absolute path if it stays inside the workspace. No file
    /// is created, opened or modified.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        resolve(&self.root, relative)
    }

    /// Create the parent directory of an already-resolved path
    ///
    /// The parent goes through the same containment check before any
    /// directory is created.
    pub fn ensure_parent_dir(&self, resolved: &Path) -> Result<(), SandboxError> {
        let Some(parent) = resolved.parent() else {
            return Err(SandboxError::Invalid("path has no parent directory".to_string()));
        };
        let parent = parent.to_string_lossy();
        let checked = self.resolve(&parent)?;
        if !checked.exists() {
            fs::create_dir_all(&checked)?;
        }
        Ok(())
    }

    /// Express an absolute path inside the workspace relative to the root
    pub fn relative(&self, absolute: &Path) -> String {
        absolute
            .strip_prefix(&self.root)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| absolute.to_string_lossy().into_owned())
    }
}

/// Join `relative` onto `root` and require the result to stay under `root`
///
/// `root` is expected to be canonical already (see [`Workspace::new`]).
pub fn resolve(root: &Path, relative: &str) -> Result<PathBuf, SandboxError> {
    let trimmed = relative.trim();
    if trimmed.is_empty() {
        return Err(SandboxError::Invalid("empty path".to_string()));
    }
    if trimmed.contains('\0') {
        return Err(SandboxError::Invalid("path contains a NUL byte".to_string()));
    }

    let joined = normalize(&root.join(trimmed));
    let resolved = resolve_symlinks(&joined)?;

    // Path::starts_with compares whole components, so /ws2 is not under /ws
    if resolved.starts_with(root) {
        Ok(resolved)
    } else {
        Err(SandboxError::Escapes {
            requested: relative.to_string(),
            resolved,
        })
    }
}

/// Lexically collapse `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Symlink hops followed before a path is refused
const MAX_LINK_DEPTH: usize = 40;

/// Canonicalize the longest existing prefix and re-append the rest
fn resolve_symlinks(path: &Path) -> Result<PathBuf, SandboxError> {
    resolve_symlinks_at(path, 0)
}

fn resolve_symlinks_at(path: &Path, depth: usize) -> Result<PathBuf, SandboxError> {
    if depth > MAX_LINK_DEPTH {
        return Err(SandboxError::Invalid("too many levels of symbolic links".to_string()));
    }

    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();

    // symlink_metadata does not follow links, so a dangling link counts as existing
    while fs::symlink_metadata(&existing).is_err() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }

    let mut resolved = match fs::symlink_metadata(&existing) {
        Ok(meta) if meta.file_type().is_symlink() => match fs::canonicalize(&existing) {
            Ok(target) => target,
            // Dangling link: resolve where a write through it would land
            Err(_) => follow_link(&existing, depth)?,
        },
        Ok(_) => fs::canonicalize(&existing)?,
        Err(_) => existing,
    };
    for part in missing.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}

fn follow_link(link: &Path, depth: usize) -> Result<PathBuf, SandboxError> {
    let target = fs::read_link(link)?;
    let target = match link.parent() {
        Some(parent) if target.is_relative() => parent.join(target),
        _ => target,
    };
    resolve_symlinks_at(&normalize(&target), depth + 1)
}
