//! Chat sessions and their messages
//!
//! A session is an ordered, append-only list of messages. The generation
//! pipeline reads only the triggering message and appends only the finished
//! assistant reply; everything else here serves the host's session list.

pub mod persistence;
pub mod store;

pub use persistence::JsonFileStore;
pub use store::{InMemoryStore, MessageStore, SessionRepository, StoreError};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Title given to sessions created without one
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Opaque session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    Assistant,
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Author::User => write!(f, "user"),
            Author::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub author: Author,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(author: Author, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::new(),
            text: text.into(),
            author,
            timestamp,
        }
    }

    pub fn is_user(&self) -> bool {
        self.author == Author::User
    }
}

/// A conversation: title plus chronologically ordered messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            title: title.into(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    pub fn latest_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Time of the last message, or creation time for an empty session
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.latest_message()
            .map(|m| m.timestamp)
            .unwrap_or(self.created_at)
    }

    /// Short local time of the last message ("14:05"), empty when there is none
    pub fn last_message_time(&self) -> String {
        self.latest_message()
            .map(|m| m.timestamp.with_timezone(&Local).format("%H:%M").to_string())
            .unwrap_or_default()
    }

    /// Text of the last message, for list rows
    pub fn preview(&self) -> &str {
        self.latest_message().map(|m| m.text.as_str()).unwrap_or("")
    }

    /// Append keeping the chronological invariant: a message may not be
    /// older than the current latest one.
    pub(crate) fn push(&mut self, message: Message) -> Result<(), StoreError> {
        if let Some(latest) = self.latest_message() {
            if message.timestamp < latest.timestamp {
                return Err(StoreError::NonMonotonicTimestamp {
                    session_id: self.id,
                    latest: latest.timestamp,
                    attempted: message.timestamp,
                });
            }
        }
        self.messages.push(message);
        Ok(())
    }
}

/// Timestamp for the next message in a session: the current time, or just
/// after `floor` when the clock has not moved past it.
pub fn next_timestamp(floor: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match floor {
        Some(floor) if now <= floor => floor + chrono::Duration::microseconds(1),
        _ => now,
    }
}
