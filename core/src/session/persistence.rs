//! Session Persistence
//!
//! File-backed session store. Every session lives in its own
//! `session_{id}.json` file inside the sessions directory.
//!
//! # Atomicity
//!
//! Each mutation writes the whole session to a temp file and renames it over
//! the previous version. The in-memory copy is only updated after the rename
//! succeeds, so a failed write leaves both views unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::{sort_by_activity, MessageStore, SessionRepository, StoreError};
use super::{Author, Message, MessageId, Session, SessionId, DEFAULT_SESSION_TITLE};

pub struct JsonFileStore {
    sessions_dir: PathBuf,
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl JsonFileStore {
    /// Open (creating if needed) a sessions directory and load every session in it.
    ///
    /// Unreadable or corrupt files are skipped with a warning.
    pub async fn open(sessions_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let sessions_dir = sessions_dir.into();
        tokio::fs::create_dir_all(&sessions_dir)
            .await
            .map_err(|source| io_error(&sessions_dir, source))?;

        let mut sessions = HashMap::new();
        let mut entries = tokio::fs::read_dir(&sessions_dir)
            .await
            .map_err(|source| io_error(&sessions_dir, source))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error(&sessions_dir, source))?
        {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !(file_name.starts_with("session_") && file_name.ends_with(".json")) {
                continue;
            }

            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(file = file_name, error = %e, "Skipping unreadable session file");
                    continue;
                }
            };
            match serde_json::from_str::<Session>(&content) {
                Ok(session) => {
                    sessions.insert(session.id, session);
                }
                Err(e) => {
                    warn!(file = file_name, error = %e, "Skipping corrupt session file");
                }
            }
        }

        info!(dir = %sessions_dir.display(), count = sessions.len(), "Loaded sessions");
        Ok(Self {
            sessions_dir,
            sessions: Mutex::new(sessions),
        })
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn session_path(&self, session_id: SessionId) -> PathBuf {
        self.sessions_dir.join(format!("session_{}.json", session_id))
    }

    /// Write to temp file, then rename
    async fn save_session_atomic(&self, session: &Session) -> Result<(), StoreError> {
        let temp_path = self.sessions_dir.join(format!("session_{}.tmp", session.id));
        let final_path = self.session_path(session.id);

        let json = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&temp_path, json)
            .await
            .map_err(|source| io_error(&temp_path, source))?;
        tokio::fs::rename(&temp_path, &final_path)
            .await
            .map_err(|source| io_error(&final_path, source))?;

        debug!(session_id = %session.id, "Saved session");
        Ok(())
    }

    /// Apply `change` to a copy of the session, persist it, then commit it.
    async fn update<F>(&self, session_id: SessionId, change: F) -> Result<Session, StoreError>
    where
        F: FnOnce(&mut Session) -> Result<(), StoreError> + Send,
    {
        let mut sessions = self.sessions.lock().await;
        let mut updated = sessions
            .get(&session_id)
            .cloned()
            .ok_or(StoreError::SessionNotFound { session_id })?;

        change(&mut updated)?;
        self.save_session_atomic(&updated).await?;
        sessions.insert(session_id, updated.clone());
        Ok(updated)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl MessageStore for JsonFileStore {
    async fn append(
        &self,
        session_id: SessionId,
        author: Author,
        text: String,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageId, StoreError> {
        let message = Message::new(author, text, timestamp);
        let id = message.id;
        self.update(session_id, move |session| session.push(message))
            .await?;
        Ok(id)
    }

    async fn latest_message(&self, session_id: SessionId) -> Option<Message> {
        self.sessions
            .lock()
            .await
            .get(&session_id)
            .and_then(|s| s.latest_message().cloned())
    }
}

#[async_trait]
impl SessionRepository for JsonFileStore {
    async fn create_session(&self, title: Option<String>) -> Result<Session, StoreError> {
        let session = Session::new(title.unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string()));
        let mut sessions = self.sessions.lock().await;
        self.save_session_atomic(&session).await?;
        sessions.insert(session.id, session.clone());
        info!(session_id = %session.id, "Created session");
        Ok(session)
    }

    async fn session(&self, session_id: SessionId) -> Option<Session> {
        self.sessions.lock().await.get(&session_id).cloned()
    }

    async fn list_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.lock().await.values().cloned().collect();
        sort_by_activity(&mut sessions);
        sessions
    }

    async fn rename_session(&self, session_id: SessionId, title: String) -> Result<(), StoreError> {
        self.update(session_id, move |session| {
            session.title = title;
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn delete_session(&self, session_id: SessionId) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(&session_id) {
            return Err(StoreError::SessionNotFound { session_id });
        }

        let path = self.session_path(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(io_error(&path, source)),
        }
        sessions.remove(&session_id);

        info!(session_id = %session_id, "Deleted session");
        Ok(())
    }
}
