//! Store backed by a hosted REST table API (PostgREST dialect).
//!
//! Rows live in one table with columns `id, content, username, room_id,
//! created_at`; the service assigns `id` and `created_at` on insert.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use super::MessageStore;
use crate::error::StoreError;
use crate::models::{ANONYMOUS_AUTHOR, ChatMessage, DEFAULT_ROOM, StoredMessage};

const SELECT_COLUMNS: &str = "id,content,username,room_id,created_at";

#[derive(Clone)]
pub struct RestStore {
    client: reqwest::Client,
    table_url: String,
    key: String,
}

#[derive(Serialize)]
struct NewRow<'a> {
    content: &'a str,
    username: &'a str,
    room_id: &'a str,
}

#[derive(Deserialize)]
struct Row {
    #[serde(deserialize_with = "id_as_string")]
    id: String,
    content: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    room_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<Row> for StoredMessage {
    fn from(row: Row) -> Self {
        Self {
            id: row.id,
            content: row.content,
            author: row.username.unwrap_or_else(|| ANONYMOUS_AUTHOR.to_string()),
            room: row.room_id.unwrap_or_else(|| DEFAULT_ROOM.to_string()),
            created_at: row.created_at,
        }
    }
}

/// Identity columns come back as numbers or strings depending on the schema.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unexpected id value: {}",
            other
        ))),
    }
}

impl RestStore {
    pub fn new(base_url: &str, key: &str, table: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("chat_relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for message store")?;

        Ok(Self {
            client,
            table_url: format!("{}/rest/v1/{}", base_url.trim_end_matches('/'), table),
            key: key.to_string(),
        })
    }

    pub fn table_url(&self) -> &str {
        &self.table_url
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }
}

/// Server-side and transport failures mean the store is unreachable; a
/// client error on insert is the store refusing this particular row.
fn classify_write_status(status: StatusCode, body: String) -> StoreError {
    if status.is_client_error() {
        StoreError::WriteRejected(format!("{}: {}", status, body))
    } else {
        StoreError::Unavailable(format!("{}: {}", status, body))
    }
}

#[async_trait]
impl MessageStore for RestStore {
    async fn append(&self, message: &ChatMessage) -> Result<StoredMessage, StoreError> {
        let row = NewRow {
            content: &message.content,
            username: &message.author,
            room_id: &message.room,
        };

        let response = self
            .authorized(self.client.post(&self.table_url))
            .query(&[("select", SELECT_COLUMNS)])
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = %status, "Store rejected insert");
            return Err(classify_write_status(status, body));
        }

        let mut rows: Vec<Row> = response
            .json()
            .await
            .map_err(|e| StoreError::Unavailable(format!("unreadable store response: {}", e)))?;

        if rows.is_empty() {
            return Err(StoreError::WriteRejected(
                "store returned no row for insert".to_string(),
            ));
        }
        Ok(rows.swap_remove(0).into())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let limit = limit.to_string();
        let response = self
            .authorized(self.client.get(&self.table_url))
            .query(&[
                ("select", SELECT_COLUMNS),
                ("order", "created_at.desc"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Unavailable(format!("{}: {}", status, body)));
        }

        let rows: Vec<Row> = response
            .json()
            .await
            .map_err(|e| StoreError::Unavailable(format!("unreadable store response: {}", e)))?;

        let mut messages: Vec<StoredMessage> = rows.into_iter().map(Into::into).collect();
        // Newest-first from the service; hand back oldest first
        messages.reverse();
        Ok(messages)
    }

    fn backend_name(&self) -> &'static str {
        "rest"
    }
}
