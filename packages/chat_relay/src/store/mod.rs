//! Message store adapters.
//!
//! A store is optional. Without one the relay forwards messages as received
//! and serves no history.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use crate::models::{ChatMessage, StoredMessage};

mod rest;
pub(crate) mod sqlite;

pub use rest::RestStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Durably write `message`, returning it with the store-assigned id and
    /// creation timestamp.
    async fn append(&self, message: &ChatMessage) -> Result<StoredMessage, StoreError>;

    /// Up to `limit` most recent messages, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError>;

    /// Short name for logs.
    fn backend_name(&self) -> &'static str;
}

pub type SharedStore = Arc<dyn MessageStore>;

/// Open the configured backend, or `None` for pure relay mode.
pub async fn connect(config: &StoreConfig) -> Result<Option<SharedStore>> {
    let store: SharedStore = match &config.backend {
        StoreBackend::Disabled => {
            info!("No message store configured; running in relay mode");
            return Ok(None);
        }
        StoreBackend::Sqlite { url } => Arc::new(SqliteStore::connect(url).await?),
        StoreBackend::Rest { url, key } => Arc::new(RestStore::new(url, key, &config.table)?),
    };

    info!(
        backend = store.backend_name(),
        history_limit = config.history_limit,
        "Persistence mode enabled"
    );
    Ok(Some(store))
}
