//! Durable, bounded conversation history.
//!
//! The store owns the history file exclusively and is injected into the
//! orchestrator; nothing else touches the file. Writes are atomic (temp
//! file then rename) and serialized under the store's lock, so a crash
//! mid-write never leaves a half-written store and concurrent appends from
//! independent reply loops never interleave on the temp file. A file that fails to parse on load is quarantined under a
//! timestamped name and replaced with an empty default; that path logs a
//! warning and never surfaces as an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cap per record category. Oldest records are evicted first.
pub const MAX_HISTORY_LENGTH: usize = 50;

/// Category of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    ChatSession,
    FreeChat,
}

/// One appended history record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub kind: RecordKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub target_app: String,
    #[serde(default)]
    pub target_object: String,
    pub payload: String,
}

impl SessionRecord {
    /// Record for one chat-session exchange (messages seen + reply sent).
    pub fn chat_session(
        target_app: impl Into<String>,
        target_object: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            kind: RecordKind::ChatSession,
            timestamp: Utc::now(),
            target_app: target_app.into(),
            target_object: target_object.into(),
            payload: payload.into(),
        }
    }

    /// Record for one free-chat exchange.
    pub fn free_chat(payload: impl Into<String>) -> Self {
        Self {
            kind: RecordKind::FreeChat,
            timestamp: Utc::now(),
            target_app: String::new(),
            target_object: String::new(),
            payload: payload.into(),
        }
    }
}

/// Persisted shape: two independently bounded ordered collections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    sessions: Vec<SessionRecord>,
    #[serde(default)]
    free_chats: Vec<SessionRecord>,
}

/// History persistence errors. Callers of `append` never see these; they
/// are logged and swallowed (record loss is acceptable, corruption is not).
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("history serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Bounded, crash-safe conversation history store.
pub struct HistoryStore {
    path: PathBuf,
    inner: Mutex<HistoryFile>,
}

impl HistoryStore {
    /// Open the store at `path`.
    ///
    /// Missing file yields an empty store. An empty or unparsable file is
    /// backed up under a timestamped name and replaced with the empty
    /// default; this is recoverable and never raises.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let inner = Self::load_or_quarantine(&path);
        Self {
            path,
            inner: Mutex::new(inner),
        }
    }

    fn load_or_quarantine(path: &Path) -> HistoryFile {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return HistoryFile::default();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "history file unreadable, starting empty");
                return HistoryFile::default();
            }
        };

        if content.trim().is_empty() {
            Self::quarantine(path);
            return HistoryFile::default();
        }

        match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "history file corrupt, quarantining");
                Self::quarantine(path);
                HistoryFile::default()
            }
        }
    }

    /// Move the bad file aside under a timestamped name. Never trusted,
    /// never deleted.
    fn quarantine(path: &Path) {
        let backup = PathBuf::from(format!(
            "{}.corrupt-{}",
            path.display(),
            Utc::now().format("%Y%m%d%H%M%S")
        ));
        if let Err(e) = fs::rename(path, &backup) {
            tracing::warn!(path = %path.display(), error = %e, "failed to back up corrupt history file");
        } else {
            tracing::warn!(path = %path.display(), backup = %backup.display(), "corrupt history file backed up");
        }
    }

    /// Append a record to its category, evicting the oldest record once the
    /// category exceeds [`MAX_HISTORY_LENGTH`], then persist.
    ///
    /// The lock spans the whole read-modify-write cycle including the disk
    /// write, so concurrent appends from independent loops serialize and
    /// each rename swaps in a complete snapshot newer than the last.
    /// Persistence failures are logged and swallowed.
    pub fn append(&self, record: SessionRecord) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let list = match record.kind {
            RecordKind::ChatSession => &mut inner.sessions,
            RecordKind::FreeChat => &mut inner.free_chats,
        };
        list.push(record);
        while list.len() > MAX_HISTORY_LENGTH {
            list.remove(0);
        }

        if let Err(e) = self.persist(&inner) {
            tracing::warn!(path = %self.path.display(), error = %e, "history persist failed, record kept in memory only");
        }
    }

    /// Atomic write: serialize to a sibling temp file, then rename over the
    /// real path.
    fn persist(&self, snapshot: &HistoryFile) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Most-recent-first session records for exactly this (app, target).
    pub fn recent_sessions(&self, app: &str, target: &str, limit: usize) -> Vec<SessionRecord> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .sessions
            .iter()
            .rev()
            .filter(|r| r.target_app == app && r.target_object == target)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most-recent-first free-chat records.
    pub fn recent_free_chats(&self, limit: usize) -> Vec<SessionRecord> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.free_chats.iter().rev().take(limit).cloned().collect()
    }

    /// (sessions, free_chats) record counts.
    pub fn len(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        (inner.sessions.len(), inner.free_chats.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0)
    }
}
