//! WebSocket Protocol Types
//!
//! Every frame is a JSON text frame carrying one named event:
//! `{"event": "chat", "data": {...}}` or `{"event": "error", "data": "..."}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HubError;
use crate::models::{ANONYMOUS_AUTHOR, ChatMessage, DEFAULT_ROOM, StoredMessage};

/// Events a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientEvent {
    Chat(Value),
}

/// Events pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ServerEvent {
    Chat(ChatPayload),
    Error(String),
}

/// Body of an outbound `chat` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatPayload {
    /// Store-enriched record (persistence mode).
    Stored(StoredMessage),
    /// The client's payload, forwarded untouched (relay mode).
    Relayed(Value),
}

#[derive(Debug, Deserialize)]
struct ChatFields {
    content: String,
    #[serde(default, alias = "username")]
    author: Option<String>,
    #[serde(default, alias = "room_id")]
    room: Option<String>,
}

/// A parsed inbound `chat` event.
#[derive(Debug, Clone)]
pub struct InboundChat {
    /// Payload exactly as received.
    pub raw: Value,
    pub message: ChatMessage,
}

/// Parse one text frame into a chat event.
///
/// Content must be present and a string; it may be empty here, the hub
/// decides whether an empty message is acceptable.
pub fn parse_chat_event(text: &str) -> Result<InboundChat, HubError> {
    let event: ClientEvent = serde_json::from_str(text)
        .map_err(|e| HubError::MalformedPayload(e.to_string()))?;

    let ClientEvent::Chat(raw) = event;
    let fields: ChatFields = serde_json::from_value(raw.clone())
        .map_err(|e| HubError::MalformedPayload(e.to_string()))?;

    let message = ChatMessage {
        content: fields.content,
        author: fields
            .author
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string()),
        room: fields
            .room
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ROOM.to_string()),
    };

    Ok(InboundChat { raw, message })
}
