//! Message store interfaces and the in-memory implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use super::{Author, Message, MessageId, Session, SessionId, DEFAULT_SESSION_TITLE};

/// Persistence failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: SessionId },

    #[error("message at {attempted} is older than the latest message ({latest}) in session {session_id}")]
    NonMonotonicTimestamp {
        session_id: SessionId,
        latest: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    #[error("session storage IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What the generation pipeline needs from persistence.
///
/// Each `append` is a single atomic operation from the caller's viewpoint.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(
        &self,
        session_id: SessionId,
        author: Author,
        text: String,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageId, StoreError>;

    async fn latest_message(&self, session_id: SessionId) -> Option<Message>;
}

/// Session management used by the host (list, create, rename, delete)
#[async_trait]
pub trait SessionRepository: MessageStore {
    async fn create_session(&self, title: Option<String>) -> Result<Session, StoreError>;

    async fn session(&self, session_id: SessionId) -> Option<Session>;

    /// All sessions, most recently active first
    async fn list_sessions(&self) -> Vec<Session>;

    async fn rename_session(&self, session_id: SessionId, title: String) -> Result<(), StoreError>;

    async fn delete_session(&self, session_id: SessionId) -> Result<(), StoreError>;
}

pub(crate) fn sort_by_activity(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
}

/// Volatile store for tests and previews
#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages across all sessions
    pub async fn message_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .map(|s| s.messages.len())
            .sum()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn append(
        &self,
        session_id: SessionId,
        author: Author,
        text: String,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageId, StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(StoreError::SessionNotFound { session_id })?;

        let message = Message::new(author, text, timestamp);
        let id = message.id;
        session.push(message)?;
        Ok(id)
    }

    async fn latest_message(&self, session_id: SessionId) -> Option<Message> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .and_then(|s| s.latest_message().cloned())
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn create_session(&self, title: Option<String>) -> Result<Session, StoreError> {
        let session = Session::new(title.unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string()));
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn session(&self, session_id: SessionId) -> Option<Session> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    async fn list_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sort_by_activity(&mut sessions);
        sessions
    }

    async fn rename_session(&self, session_id: SessionId, title: String) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(StoreError::SessionNotFound { session_id })?;
        session.title = title;
        Ok(())
    }

    async fn delete_session(&self, session_id: SessionId) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .remove(&session_id)
            .map(|_| ())
            .ok_or(StoreError::SessionNotFound { session_id })
    }
}
