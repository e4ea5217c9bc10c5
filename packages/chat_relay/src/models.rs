use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author used when a client does not name itself.
pub const ANONYMOUS_AUTHOR: &str = "anonymous";

/// The single room every message lands in.
pub const DEFAULT_ROOM: &str = "public";

/// One unit of conversation as parsed from a client event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    pub author: String,
    pub room: String,
}

impl ChatMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            author: ANONYMOUS_AUTHOR.to_string(),
            room: DEFAULT_ROOM.to_string(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }
}

/// A message after a successful store write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub content: String,
    pub author: String,
    pub room: String,
    pub created_at: DateTime<Utc>,
}

/// Projection served by the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub content: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

impl From<StoredMessage> for HistoryEntry {
    fn from(msg: StoredMessage) -> Self {
        Self {
            content: msg.content,
            author: msg.author,
            created_at: msg.created_at,
        }
    }
}
