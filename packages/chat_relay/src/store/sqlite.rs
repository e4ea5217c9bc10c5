use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::MessageStore;
use crate::error::StoreError;
use crate::models::{ChatMessage, StoredMessage};

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to message store: {}", url);

        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid sqlite url: {}", url))?
            .create_if_missing(true);

        let pool = pool_options(url)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open message store: {}", url))?;

        run_migrations(&pool).await?;

        Ok(Self::new(pool))
    }

    /// Wrap an already-migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Pool settings for `url`.
///
/// Every connection to `:memory:` is its own database, so an in-memory store
/// gets exactly one connection that is never reaped.
pub(crate) fn pool_options(url: &str) -> SqlitePoolOptions {
    if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    }
}

/// SQLite reads a negative LIMIT as unbounded.
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL DEFAULT (unixepoch()),
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(pool)
            .await?;

    if current_version < 1 {
        info!("Applying message store migration 1");
        // seq breaks ties between messages created in the same millisecond
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                content TEXT NOT NULL CHECK (length(content) > 0),
                author TEXT NOT NULL,
                room TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_created ON chat_messages(created_at, seq)",
        )
        .execute(pool)
        .await?;

        sqlx::query("INSERT INTO schema_version (version, description) VALUES (1, 'chat_messages')")
            .execute(pool)
            .await?;
    }

    Ok(())
}

/// Constraint violations are the store declining the write; anything else
/// means the database could not be used.
fn classify_write_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) => StoreError::WriteRejected(db.message().to_string()),
        other => StoreError::Unavailable(other.to_string()),
    }
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Unavailable(format!("invalid timestamp in store: {}", millis)))
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(&self, message: &ChatMessage) -> Result<StoredMessage, StoreError> {
        let id = uuid::Uuid::now_v7().to_string();
        let created_millis = Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, content, author, room, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&message.content)
        .bind(&message.author)
        .bind(&message.room)
        .bind(created_millis)
        .execute(&self.pool)
        .await
        .map_err(classify_write_error)?;

        Ok(StoredMessage {
            id,
            content: message.content.clone(),
            author: message.author.clone(),
            room: message.room.clone(),
            created_at: millis_to_datetime(created_millis)?,
        })
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, content, author, room, created_at
            FROM chat_messages
            ORDER BY created_at DESC, seq DESC
            LIMIT ?
            "#,
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut messages = rows
            .into_iter()
            .map(|r| {
                Ok(StoredMessage {
                    id: r.get("id"),
                    content: r.get("content"),
                    author: r.get("author"),
                    room: r.get("room"),
                    created_at: millis_to_datetime(r.get("created_at"))?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        // Reverse so oldest is first (natural reading order)
        messages.reverse();

        Ok(messages)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
