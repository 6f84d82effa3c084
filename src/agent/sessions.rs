//! Conversation sessions and their persisted history
//!
//! A [`Session`] holds two histories:
//!
//! ```text
//! permanent: [user, assistant, user, assistant, ...]        persisted, append-only
//! working:   [system, user, assistant(tool_calls), tool,    rebuilt every turn,
//!             tool, system(nudge), assistant, ...]            discarded afterwards
//! ```
//!
//! The [`HistoryStore`] writes the user turns of the permanent history to a
//! JSON file behind the session's marker, and restores the latest window
//! from it. Each session owns one block of the file:
//!
//! ```text
//! [marker(run 1), user, user, marker(run 2), user, ...]
//!                             └── rewritten by run 2 only
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ollama::{ChatMessage, Role};

const SESSION_MARKER_PREFIX: &str = "New session started at ";
const SESSION_MARKER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Session marker text for `time`
pub fn session_marker(time: DateTime<Local>) -> String {
    format!(
        "{}{}",
        SESSION_MARKER_PREFIX,
        time.format(SESSION_MARKER_TIME_FORMAT)
    )
}

/// Whether a stored message is a session marker
pub fn is_session_marker(message: &StoredMessage) -> bool {
    message.role == Role::System && message.content.starts_with(SESSION_MARKER_PREFIX)
}

fn marker_of(message: &ChatMessage) -> Option<&str> {
    let content = message.content.as_deref()?;
    (message.role == Role::System && content.starts_with(SESSION_MARKER_PREFIX)).then_some(content)
}

#[derive(Debug, Default)]
struct Histories {
    permanent: Vec<ChatMessage>,
    working: Vec<ChatMessage>,
}

/// One conversation
///
/// Shared by reference; the histories sit behind a mutex that is only held
/// for short copies, never across a model or tool call.
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: DateTime<Local>,
    marker: String,
    in_progress: AtomicBool,
    histories: Mutex<Histories>,
}

/// Held while a turn runs; clears the in-progress flag when dropped
#[derive(Debug)]
pub struct TurnGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_history(Vec::new())
    }

    /// Start from a restored permanent history
    ///
    /// A history that opens with a session marker continues that session;
    /// otherwise a new marker is stamped from the creation time.
    pub fn with_history(permanent: Vec<ChatMessage>) -> Self {
        let created_at = Local::now();
        let marker = permanent
            .first()
            .and_then(marker_of)
            .map(str::to_string)
            .unwrap_or_else(|| session_marker(created_at));
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            created_at,
            marker,
            in_progress: AtomicBool::new(false),
            histories: Mutex::new(Histories {
                permanent,
                working: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    /// Marker heading this session's block in the history file
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Claim the session for one turn
    ///
    /// Returns `None` if another turn is already running.
    pub fn try_begin(&self) -> Option<TurnGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TurnGuard {
                flag: &self.in_progress,
            })
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Histories> {
        // A panic while holding the lock leaves plain Vecs behind; keep going
        self.histories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn permanent_history(&self) -> Vec<ChatMessage> {
        self.lock().permanent.clone()
    }

    pub fn working_history(&self) -> Vec<ChatMessage> {
        self.lock().working.clone()
    }

    /// Append a user message unless it is blank or repeats the last stored
    /// user message
    ///
    /// Returns whether the message was appended.
    pub fn append_user_message(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        let mut histories = self.lock();
        let duplicate = histories
            .permanent
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .is_some_and(|m| m.content_str().trim() == text.trim());
        if duplicate {
            debug!(session = %self.id, "Skipping duplicate user message");
            return false;
        }
        histories.permanent.push(ChatMessage::user(text));
        true
    }

    pub fn push_permanent(&self, message: ChatMessage) {
        self.lock().permanent.push(message);
    }

    pub fn set_working(&self, working: Vec<ChatMessage>) {
        self.lock().working = working;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// One element of the persisted history file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
}

impl StoredMessage {
    fn into_chat_message(self) -> ChatMessage {
        match self.role {
            Role::System => ChatMessage::system(self.content),
            Role::User => ChatMessage::user(self.content),
            Role::Assistant => ChatMessage::assistant(self.content),
            Role::Tool => ChatMessage::tool(crate::ollama::MISSING_TOOL_CALL_ID, self.content),
        }
    }
}

/// Error type for history persistence
#[derive(Debug)]
pub enum HistoryError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
}

impl std::fmt::Display for HistoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryError::Io(e) => write!(f, "History file I/O error: {}", e),
            HistoryError::Serialize(e) => write!(f, "History serialization error: {}", e),
        }
    }
}

impl std::error::Error for HistoryError {}

impl From<std::io::Error> for HistoryError {
    fn from(e: std::io::Error) -> Self {
        HistoryError::Io(e)
    }
}

impl From<serde_json::Error> for HistoryError {
    fn from(e: serde_json::Error) -> Self {
        HistoryError::Serialize(e)
    }
}

/// Persists the user side of a conversation to a JSON file
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    // Serializes read-modify-write cycles from concurrent sessions
    write_lock: Mutex<()>,
    max_history_messages: usize,
    max_session_messages: usize,
}

impl HistoryStore {
    pub fn new(
        path: impl Into<PathBuf>,
        max_history_messages: usize,
        max_session_messages: usize,
    ) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            max_history_messages,
            max_session_messages,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Option<Vec<StoredMessage>> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&text) {
            Ok(messages) => Some(messages),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable history file");
                None
            }
        }
    }

    /// Write the last user turns of `permanent` behind `marker`
    ///
    /// Only the block headed by `marker` is replaced; blocks written by
    /// earlier sessions are kept. A marker not yet in the file starts a new
    /// block at the end. Returns the number of user messages written.
    pub fn persist(&self, marker: &str, permanent: &[ChatMessage]) -> Result<usize, HistoryError> {
        let users: Vec<StoredMessage> = permanent
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| StoredMessage {
                role: Role::User,
                content: normalize_whitespace(m.content_str()),
            })
            .collect();
        let skip = users.len().saturating_sub(self.max_history_messages);
        let users = &users[skip..];

        let _write = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut out = self.read_file().unwrap_or_default();
        // Messages ahead of the first marker belong to no session
        let first = out.iter().position(is_session_marker).unwrap_or(out.len());
        out.drain(..first);
        let block = match out
            .iter()
            .rposition(|m| is_session_marker(m) && m.content == marker)
        {
            Some(start) => {
                let end = out[start + 1..]
                    .iter()
                    .position(is_session_marker)
                    .map_or(out.len(), |i| start + 1 + i);
                start..end
            }
            None => out.len()..out.len(),
        };

        let mut own = Vec::with_capacity(users.len() + 1);
        own.push(StoredMessage {
            role: Role::System,
            content: marker.to_string(),
        });
        own.extend_from_slice(users);
        out.splice(block, own);

        let json = serde_json::to_string_pretty(&out)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), messages = users.len(), "History persisted");
        Ok(users.len())
    }

    /// Restore the latest session window
    ///
    /// Starts at the last session marker and keeps the marker plus at most
    /// `max_session_messages` messages after it. A missing or unreadable
    /// file yields an empty history.
    pub fn load(&self) -> Vec<ChatMessage> {
        let Some(stored) = self.read_file() else {
            return Vec::new();
        };

        let start = stored.iter().rposition(is_session_marker).unwrap_or(0);
        let mut window = stored.into_iter().skip(start);

        let mut restored = Vec::new();
        let first = window.next();
        let marker = first.as_ref().is_some_and(is_session_marker);
        let rest: Vec<StoredMessage> = match first {
            Some(m) if marker => {
                restored.push(m.into_chat_message());
                window.collect()
            }
            Some(m) => std::iter::once(m).chain(window).collect(),
            None => Vec::new(),
        };

        let skip = rest.len().saturating_sub(self.max_session_messages);
        restored.extend(rest.into_iter().skip(skip).map(StoredMessage::into_chat_message));
        restored
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir, max: usize) -> HistoryStore {
        HistoryStore::new(dir.path().join("chat_history.json"), max, max)
    }

    const RUN_ONE: &str = "New session started at 2025-01-01 10:00:00";
    const RUN_TWO: &str = "New session started at 2025-01-02 10:00:00";

    fn read(store: &HistoryStore) -> Vec<StoredMessage> {
        serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap()
    }

    #[test]
    fn test_session_marker_format() {
        let marker = StoredMessage {
            role: Role::System,
            content: session_marker(Local::now()),
        };
        assert!(is_session_marker(&marker));
        assert_eq!(
            marker.content.len(),
            SESSION_MARKER_PREFIX.len() + "2025-01-01 00:00:00".len()
        );
    }

    #[test]
    fn test_turn_guard_clears_flag() {
        let session = Session::new();
        {
            let guard = session.try_begin();
            assert!(guard.is_some());
            assert!(session.is_in_progress());
            assert!(session.try_begin().is_none());
        }
        assert!(!session.is_in_progress());
        assert!(session.try_begin().is_some());
    }

    #[test]
    fn test_duplicate_user_message_skipped() {
        let session = Session::new();
        assert!(session.append_user_message("hello"));
        session.push_permanent(ChatMessage::assistant("hi"));
        assert!(!session.append_user_message("hello "));
        assert!(session.append_user_message("something else"));
        assert_eq!(session.permanent_history().len(), 3);
    }

    #[test]
    fn test_blank_user_message_ignored() {
        let session = Session::new();
        assert!(!session.append_user_message(""));
        assert!(!session.append_user_message(" \n\t "));
        assert!(session.permanent_history().is_empty());
    }

    #[test]
    fn test_session_marker_follows_history() {
        let fresh = Session::new();
        assert_eq!(fresh.marker(), session_marker(fresh.created_at()));

        let resumed = Session::with_history(vec![
            ChatMessage::system(RUN_ONE),
            ChatMessage::user("earlier"),
        ]);
        assert_eq!(resumed.marker(), RUN_ONE);
    }

    #[test]
    fn test_persist_keeps_only_user_messages() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 10);
        let history = vec![
            ChatMessage::user("  list   the\nfiles "),
            ChatMessage::assistant("done"),
            ChatMessage::user("thanks"),
        ];
        assert_eq!(store.persist(RUN_ONE, &history).unwrap(), 2);

        let stored = read(&store);
        assert_eq!(stored.len(), 3);
        assert!(is_session_marker(&stored[0]));
        assert_eq!(stored[1].content, "list the files");
        assert_eq!(stored[2].content, "thanks");
    }

    #[test]
    fn test_persist_trims_own_block() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 3);
        let mut history = Vec::new();

        for i in 0..7 {
            history.push(ChatMessage::user(format!("message {i}")));
            store.persist(RUN_ONE, &history).unwrap();
            assert_eq!(read(&store)[0].content, RUN_ONE);
        }

        let stored = read(&store);
        assert_eq!(stored.iter().filter(|m| is_session_marker(m)).count(), 1);
        let contents: Vec<&str> = stored[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["message 4", "message 5", "message 6"]);
    }

    #[test]
    fn test_persist_replaces_foreign_head() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 5);
        std::fs::write(store.path(), r#"[{"role": "user", "content": "stray"}]"#).unwrap();

        store.persist(RUN_ONE, &[ChatMessage::user("hi")]).unwrap();
        let stored = read(&store);
        assert!(is_session_marker(&stored[0]));
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn test_new_session_keeps_earlier_sessions() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir, 5)
            .persist(RUN_ONE, &[ChatMessage::user("run one")])
            .unwrap();

        let store = store(&dir, 5);
        store
            .persist(RUN_TWO, &[ChatMessage::user("run two")])
            .unwrap();

        let contents: Vec<String> = read(&store).into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec![RUN_ONE, "run one", RUN_TWO, "run two"]);

        let restored = store.load();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].content_str(), RUN_TWO);
        assert_eq!(restored[1].content_str(), "run two");
    }

    #[test]
    fn test_interleaved_sessions_rewrite_only_their_block() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 5);

        store.persist(RUN_ONE, &[ChatMessage::user("a1")]).unwrap();
        store.persist(RUN_TWO, &[ChatMessage::user("b1")]).unwrap();
        store
            .persist(RUN_ONE, &[ChatMessage::user("a1"), ChatMessage::user("a2")])
            .unwrap();

        let contents: Vec<String> = read(&store).into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec![RUN_ONE, "a1", "a2", RUN_TWO, "b1"]);
    }

    #[test]
    fn test_load_missing_or_corrupt_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, 5);
        assert!(store.load().is_empty());

        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_load_starts_at_last_marker_and_caps() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("h.json"), 10, 2);
        let file = serde_json::json!([
            {"role": "system", "content": "New session started at 2025-01-01 10:00:00"},
            {"role": "user", "content": "old"},
            {"role": "system", "content": "New session started at 2025-01-02 10:00:00"},
            {"role": "user", "content": "a"},
            {"role": "user", "content": "b"},
            {"role": "user", "content": "c"}
        ]);
        std::fs::write(store.path(), file.to_string()).unwrap();

        let restored = store.load();
        assert_eq!(restored.len(), 3);
        assert_eq!(restored[0].role, Role::System);
        assert!(restored[0].content_str().ends_with("2025-01-02 10:00:00"));
        assert_eq!(restored[1].content_str(), "b");
        assert_eq!(restored[2].content_str(), "c");
    }
}
