use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::AppState;
use crate::config::RelayConfig;
use crate::error::StoreError;
use crate::hub::Hub;
use crate::metrics::RelayMetrics;
use crate::models::{ChatMessage, StoredMessage};
use crate::registry::ConnectionRegistry;
use crate::store::{MessageStore, SharedStore, SqliteStore};

/// Fresh in-memory SQLite store with migrations applied.
pub async fn test_sqlite_store() -> SqliteStore {
    let pool = crate::store::sqlite::pool_options("sqlite::memory:")
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    crate::store::sqlite::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    SqliteStore::new(pool)
}

/// A store that fails every call the same way.
pub struct FailingStore {
    error: StoreError,
    attempts: AtomicUsize,
}

impl FailingStore {
    pub fn unavailable() -> Self {
        Self {
            error: StoreError::Unavailable("connection refused".into()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            error: StoreError::WriteRejected("violates check constraint".into()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStore for FailingStore {
    async fn append(&self, _message: &ChatMessage) -> Result<StoredMessage, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }

    async fn recent(&self, _limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

pub fn relay_hub() -> Hub {
    Hub::new(
        Arc::new(ConnectionRegistry::new()),
        None,
        Arc::new(RelayMetrics::new()),
    )
}

pub fn hub_with_store(store: SharedStore) -> Hub {
    Hub::new(
        Arc::new(ConnectionRegistry::new()),
        Some(store),
        Arc::new(RelayMetrics::new()),
    )
}

/// Hub in persistence mode plus a handle on its store for assertions.
pub async fn persistent_hub() -> (Hub, SqliteStore) {
    let store = test_sqlite_store().await;
    (hub_with_store(Arc::new(store.clone())), store)
}

/// Fully wired `AppState` with the given store (None = relay mode).
pub fn test_app_state(store: Option<SharedStore>) -> AppState {
    AppState::new(RelayConfig::default(), store)
}
