//! Durable per-key conversation log
//!
//! Every session lives in memory and, when a storage root is configured, as
//! one pretty-printed JSON snapshot per key:
//!
//! ```text
//! data/sessions/
//! ├── global.json
//! ├── telegram_42.json
//! ├── user_7.json
//! └── session-<uuid>.tmp   (only while a write is in flight)
//! ```
//!
//! Snapshots are written to a temp file in the same directory, synced, and
//! renamed over the target, so a reader or a restarted process only ever
//! sees the previous or the new complete snapshot.

use super::key::{canonical_key, session_file_stem, SESSION_FILE_EXTENSION};
use crate::channels::Message;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

const TEMP_PREFIX: &str = "session-";
const TEMP_SUFFIX: &str = ".tmp";

/// Durable conversation history for one session key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session key
    pub key: String,
    /// Messages in insertion order
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<Message>,
    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    /// Last append timestamp
    #[serde(default = "Utc::now")]
    pub updated: DateTime<Utc>,
}

impl Session {
    fn new(key: &str) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_string(),
            messages: Vec::with_capacity(32),
            created: now,
            updated: now,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<Message>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Message>>::deserialize(deserializer)?.unwrap_or_default())
}

struct SessionEntry {
    session: Session,
    /// Serializes snapshot writes for this key so files only move forward.
    write_lock: Arc<Mutex<()>>,
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        Self {
            session,
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Session store with optional file persistence
pub struct SessionStore {
    storage: Option<PathBuf>,
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl SessionStore {
    /// Create a store persisting under `storage`, loading existing sessions.
    ///
    /// `None` (or an empty path) gives a memory-only store.
    pub async fn new(storage: Option<PathBuf>) -> Result<Self> {
        let storage = storage.filter(|dir| !dir.as_os_str().is_empty());

        let sessions = match &storage {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    Error::Storage(format!(
                        "create session directory {}: {}",
                        dir.display(),
                        e
                    ))
                })?;
                let loaded = Self::load_from_disk(dir).await?;
                tracing::info!(
                    dir = %dir.display(),
                    sessions = loaded.len(),
                    "Session store loaded"
                );
                loaded
            }
            None => HashMap::new(),
        };

        Ok(Self {
            storage,
            sessions: Arc::new(RwLock::new(sessions)),
        })
    }

    /// Create a memory-only store
    pub fn in_memory() -> Self {
        Self {
            storage: None,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Storage root, if persistence is enabled
    pub fn storage_dir(&self) -> Option<&Path> {
        self.storage.as_deref()
    }

    /// Append a message to a session and persist the session.
    ///
    /// The key is validated before anything changes. If the write fails the
    /// message stays in memory and the next save of the key writes it again.
    pub async fn add_message(&self, session_key: &str, message: Message) -> Result<()> {
        let key = canonical_key(session_key);
        let stem = session_file_stem(&key)?;

        let write_lock = {
            let mut sessions = self.sessions.write().await;
            if self.storage.is_some() && !sessions.contains_key(&key) {
                if let Some(other) = file_owner(&sessions, &stem) {
                    tracing::warn!(
                        session = %key,
                        other = %other,
                        "Session shares its file with another key; only the last write survives a restart"
                    );
                }
            }
            let entry = sessions
                .entry(key.clone())
                .or_insert_with(|| SessionEntry::new(Session::new(&key)));
            entry.session.messages.push(message);
            entry.session.updated = Utc::now();
            entry.write_lock.clone()
        };

        self.persist(&key, &write_lock).await
    }

    /// Persist one session to disk (no-op for unknown keys or memory-only stores)
    pub async fn save(&self, session_key: &str) -> Result<()> {
        let key = canonical_key(session_key);
        let write_lock = {
            let sessions = self.sessions.read().await;
            match sessions.get(&key) {
                Some(entry) => entry.write_lock.clone(),
                None => return Ok(()),
            }
        };
        self.persist(&key, &write_lock).await
    }

    /// Persist every session, returning the first failure after trying all
    pub async fn flush(&self) -> Result<()> {
        if self.storage.is_none() {
            return Ok(());
        }

        let keys: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.save(&key).await {
                tracing::warn!(session = %key, "Failed to flush session: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Copy of a session's messages; empty for unknown keys
    pub async fn history(&self, session_key: &str) -> Vec<Message> {
        let key = canonical_key(session_key);
        self.sessions
            .read()
            .await
            .get(&key)
            .map(|entry| entry.session.messages.clone())
            .unwrap_or_default()
    }

    /// Copy of a whole session
    pub async fn session(&self, session_key: &str) -> Option<Session> {
        let key = canonical_key(session_key);
        self.sessions
            .read()
            .await
            .get(&key)
            .map(|entry| entry.session.clone())
    }

    /// Number of known sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Number of messages across all sessions
    pub async fn total_message_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .map(|entry| entry.session.messages.len())
            .sum()
    }

    async fn persist(&self, key: &str, write_lock: &Mutex<()>) -> Result<()> {
        let Some(dir) = &self.storage else {
            return Ok(());
        };
        let stem = session_file_stem(key)?;

        let _guard = write_lock.lock().await;
        let snapshot = {
            let sessions = self.sessions.read().await;
            match sessions.get(key) {
                Some(entry) => entry.session.clone(),
                None => return Ok(()),
            }
        };

        let payload = serde_json::to_vec_pretty(&snapshot)?;
        let target = dir.join(format!("{}.{}", stem, SESSION_FILE_EXTENSION));
        write_atomic(dir, &target, &payload).await?;

        tracing::debug!(
            session = %key,
            messages = snapshot.messages.len(),
            "Session persisted"
        );
        Ok(())
    }

    /// Load every readable session file, skipping the rest
    async fn load_from_disk(dir: &Path) -> Result<HashMap<String, SessionEntry>> {
        let mut sessions = HashMap::new();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(true) {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX) {
                // Left behind by a write that never reached its rename.
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => tracing::debug!(path = %path.display(), "Removed stale session temp file"),
                    Err(e) => tracing::warn!(path = %path.display(), "Failed to remove stale temp file: {}", e),
                }
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(SESSION_FILE_EXTENSION) {
                continue;
            }

            let data = match tokio::fs::read_to_string(&path).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("Failed to read session {}: {}", path.display(), e);
                    continue;
                }
            };
            let session = match serde_json::from_str::<Session>(&data) {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!("Failed to parse session {}: {}", path.display(), e);
                    continue;
                }
            };
            if session.key.trim().is_empty() {
                tracing::warn!("Skipping session {} with blank key", path.display());
                continue;
            }

            sessions.insert(session.key.clone(), SessionEntry::new(session));
        }

        Ok(sessions)
    }
}

/// Key already stored under `stem`, if any
fn file_owner<'a>(sessions: &'a HashMap<String, SessionEntry>, stem: &str) -> Option<&'a str> {
    sessions
        .keys()
        .find(|key| session_file_stem(key).map_or(false, |other| other == stem))
        .map(String::as_str)
}

/// Write `payload` to `target` via temp file, fsync and rename.
async fn write_atomic(dir: &Path, target: &Path, payload: &[u8]) -> Result<()> {
    let temp_path = dir.join(format!("{}{}{}", TEMP_PREFIX, uuid::Uuid::new_v4(), TEMP_SUFFIX));

    let result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;
        file.write_all(payload).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp_path, target).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(Error::Storage(format!(
            "write session file {}: {}",
            target.display(),
            e
        )));
    }

    // Make the rename itself durable; not every platform can sync a directory.
    if let Ok(dir_handle) = tokio::fs::File::open(dir).await {
        let _ = dir_handle.sync_all().await;
    }

    Ok(())
}
