//! Broadcast hub.
//!
//! Turns inbound chat events into outbound fan-out. With a store configured a
//! message is written first and only the stored record is broadcast; without
//! one the client's payload is forwarded untouched.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{HubError, RegistryError, StoreError};
use crate::metrics::RelayMetrics;
use crate::models::{DEFAULT_ROOM, StoredMessage};
use crate::protocol::{ChatPayload, ServerEvent, parse_chat_event};
use crate::registry::{Connection, ConnectionRegistry, FanOut};
use crate::store::SharedStore;

pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    store: Option<SharedStore>,
    shared_room: String,
    metrics: Arc<RelayMetrics>,
}

impl Hub {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Option<SharedStore>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            registry,
            store,
            shared_room: DEFAULT_ROOM.to_string(),
            metrics,
        }
    }

    /// Room every persisted message is recorded under.
    pub fn with_shared_room(mut self, room: impl Into<String>) -> Self {
        self.shared_room = room.into();
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    pub async fn on_connection_opened(&self, connection: Connection) -> Result<(), RegistryError> {
        self.registry.register(connection).await?;
        self.metrics.connection_opened();
        Ok(())
    }

    /// Handle one inbound text frame from `connection_id`.
    ///
    /// On failure the originating connection alone gets an `error` event and
    /// nothing is broadcast.
    pub async fn on_inbound_message(&self, connection_id: &str, raw: &str) -> Result<FanOut, HubError> {
        self.metrics.message_received();

        match self.relay(raw).await {
            Ok(outcome) => {
                self.metrics
                    .broadcast_completed(outcome.delivered, outcome.failed);
                debug!(
                    conn_id = %connection_id,
                    delivered = outcome.delivered,
                    failed = outcome.failed,
                    "Message broadcast"
                );
                Ok(outcome)
            }
            Err(err) => {
                match &err {
                    HubError::MalformedPayload(reason) => {
                        self.metrics.message_malformed();
                        debug!(
                            conn_id = %connection_id,
                            code = err.error_code(),
                            reason = %reason,
                            "Dropped malformed payload"
                        );
                    }
                    HubError::Store(store_err) => {
                        self.metrics.store_failure();
                        warn!(
                            conn_id = %connection_id,
                            code = store_err.error_code(),
                            error = %store_err,
                            "Failed to save message"
                        );
                    }
                }

                let notice = ServerEvent::Error(err.client_message().to_string());
                if let Err(e) = self.registry.send_to(connection_id, notice).await {
                    debug!(conn_id = %connection_id, error = %e, "Could not deliver error notice");
                }
                Err(err)
            }
        }
    }

    async fn relay(&self, raw: &str) -> Result<FanOut, HubError> {
        let inbound = parse_chat_event(raw)?;

        let payload = match &self.store {
            None => ChatPayload::Relayed(inbound.raw),
            Some(store) => {
                let mut message = inbound.message;
                if message.content.is_empty() {
                    return Err(HubError::MalformedPayload("empty content".to_string()));
                }
                if message.room != self.shared_room {
                    debug!(requested = %message.room, room = %self.shared_room, "Room is not partitioned; using shared room");
                    message.room = self.shared_room.clone();
                }

                let stored = store.append(&message).await?;
                self.metrics.store_write();
                ChatPayload::Stored(stored)
            }
        };

        Ok(self.registry.broadcast(ServerEvent::Chat(payload)).await)
    }

    /// Drop the connection from the registry. Safe to call more than once.
    pub async fn on_connection_closed(&self, connection_id: &str) {
        if self.registry.unregister(connection_id).await {
            self.metrics.connection_closed();
        }
    }

    /// Most recent persisted messages, oldest first. Empty in relay mode.
    pub async fn history(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        match &self.store {
            Some(store) => store.recent(limit).await,
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OutboundEvent;
    use crate::models::ChatMessage;
    use crate::store::{MessageStore, SqliteStore};
    use async_trait::async_trait;
    use crate::test_helpers::{self, FailingStore};
    use serde_json::json;
    use tokio::sync::{Notify, mpsc};

    async fn join(hub: &Hub, id: &str) -> mpsc::Receiver<OutboundEvent> {
        let (connection, rx) = Connection::new(id, 16);
        hub.on_connection_opened(connection).await.unwrap();
        rx
    }

    fn chat(data: serde_json::Value) -> String {
        json!({"event": "chat", "data": data}).to_string()
    }

    fn stored_payload(event: &ServerEvent) -> &StoredMessage {
        match event {
            ServerEvent::Chat(ChatPayload::Stored(stored)) => stored,
            other => panic!("expected stored chat, got {:?}", other),
        }
    }

    // ── relay mode ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn relay_mode_echoes_payload_to_everyone() {
        let hub = test_helpers::relay_hub();
        let mut c1 = join(&hub, "c1").await;
        let mut c2 = join(&hub, "c2").await;

        let outcome = hub
            .on_inbound_message("c1", &chat(json!({"content": "hi"})))
            .await
            .unwrap();
        assert_eq!(outcome.delivered, 2);

        let expected = ServerEvent::Chat(ChatPayload::Relayed(json!({"content": "hi"})));
        assert_eq!(*c1.recv().await.unwrap(), expected);
        assert_eq!(*c2.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn relay_mode_forwards_empty_content() {
        let hub = test_helpers::relay_hub();
        let mut c1 = join(&hub, "c1").await;

        hub.on_inbound_message("c1", &chat(json!({"content": ""})))
            .await
            .unwrap();
        let expected = ServerEvent::Chat(ChatPayload::Relayed(json!({"content": ""})));
        assert_eq!(*c1.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn malformed_payload_only_reaches_sender() {
        let hub = test_helpers::relay_hub();
        let mut c1 = join(&hub, "c1").await;
        let mut c2 = join(&hub, "c2").await;

        let err = hub
            .on_inbound_message("c1", &chat(json!({"author": "alice"})))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::MalformedPayload(_)));

        assert_eq!(
            *c1.recv().await.unwrap(),
            ServerEvent::Error("malformed chat message".into())
        );
        assert!(c2.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_connection_is_skipped() {
        let hub = test_helpers::relay_hub();
        let mut c1 = join(&hub, "c1").await;
        let mut c2 = join(&hub, "c2").await;

        hub.on_connection_closed("c1").await;
        hub.on_connection_closed("c1").await;

        let outcome = hub
            .on_inbound_message("c2", &chat(json!({"content": "still here?"})))
            .await
            .unwrap();
        assert_eq!(outcome, FanOut { delivered: 1, failed: 0 });
        assert!(c2.recv().await.is_some());
        assert!(c1.try_recv().is_err());
    }

    #[tokio::test]
    async fn relay_mode_history_is_empty() {
        let hub = test_helpers::relay_hub();
        assert!(!hub.is_persistent());
        assert!(hub.history(50).await.unwrap().is_empty());
    }

    // ── persistence mode ────────────────────────────────────────────────

    #[tokio::test]
    async fn persistence_mode_broadcasts_stored_record() {
        let (hub, store) = test_helpers::persistent_hub().await;
        let mut c1 = join(&hub, "c1").await;
        let mut c2 = join(&hub, "c2").await;

        hub.on_inbound_message("c1", &chat(json!({"content": "hi", "author": "alice"})))
            .await
            .unwrap();

        let first = c1.recv().await.unwrap();
        let second = c2.recv().await.unwrap();
        assert_eq!(first, second);

        let stored = stored_payload(&first);
        assert!(!stored.id.is_empty());
        assert_eq!(stored.content, "hi");
        assert_eq!(stored.author, "alice");

        let persisted = store.recent(1).await.unwrap();
        assert_eq!(persisted, vec![stored.clone()]);
    }

    #[tokio::test]
    async fn persistence_mode_coerces_room() {
        let (hub, _store) = test_helpers::persistent_hub().await;
        let mut c1 = join(&hub, "c1").await;

        hub.on_inbound_message("c1", &chat(json!({"content": "hi", "room": "side"})))
            .await
            .unwrap();
        let event = c1.recv().await.unwrap();
        assert_eq!(stored_payload(&event).room, DEFAULT_ROOM);
    }

    #[tokio::test]
    async fn persistence_mode_rejects_empty_content() {
        let (hub, store) = test_helpers::persistent_hub().await;
        let mut c1 = join(&hub, "c1").await;

        let err = hub
            .on_inbound_message("c1", &chat(json!({"content": ""})))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::MalformedPayload(_)));
        assert!(matches!(*c1.recv().await.unwrap(), ServerEvent::Error(_)));
        assert!(store.recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_notifies_sender_only() {
        let store = Arc::new(FailingStore::unavailable());
        let hub = test_helpers::hub_with_store(store.clone());
        let mut c1 = join(&hub, "c1").await;
        let mut c2 = join(&hub, "c2").await;

        let err = hub
            .on_inbound_message("c1", &chat(json!({"content": "lost"})))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Store(StoreError::Unavailable(_))));
        assert_eq!(store.attempts(), 1);

        assert_eq!(
            *c1.recv().await.unwrap(),
            ServerEvent::Error("failed to save message".into())
        );
        assert!(c1.try_recv().is_err());
        assert!(c2.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_write_looks_the_same_to_the_sender() {
        let hub = test_helpers::hub_with_store(Arc::new(FailingStore::rejecting()));
        let mut c1 = join(&hub, "c1").await;

        let err = hub
            .on_inbound_message("c1", &chat(json!({"content": "nope"})))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Store(StoreError::WriteRejected(_))));
        assert_eq!(
            *c1.recv().await.unwrap(),
            ServerEvent::Error("failed to save message".into())
        );
    }

    #[tokio::test]
    async fn history_surfaces_store_unavailable() {
        let hub = test_helpers::hub_with_store(Arc::new(FailingStore::unavailable()));
        let err = hub.history(50).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn messages_from_one_connection_keep_their_order() {
        let (hub, _store) = test_helpers::persistent_hub().await;
        let mut c1 = join(&hub, "c1").await;

        for i in 0..5 {
            hub.on_inbound_message("c1", &chat(json!({"content": format!("m{}", i)})))
                .await
                .unwrap();
        }
        for i in 0..5 {
            let event = c1.recv().await.unwrap();
            assert_eq!(stored_payload(&event).content, format!("m{}", i));
        }
    }

    /// Holds every write until released, then passes it to `inner`.
    struct GatedStore {
        inner: SqliteStore,
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl MessageStore for GatedStore {
        async fn append(&self, message: &ChatMessage) -> Result<StoredMessage, StoreError> {
            self.started.notify_one();
            self.release.notified().await;
            self.inner.append(message).await
        }

        async fn recent(&self, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
            self.inner.recent(limit).await
        }

        fn backend_name(&self) -> &'static str {
            "gated"
        }
    }

    #[tokio::test]
    async fn close_during_write_still_fans_out_to_the_rest() {
        let inner = test_helpers::test_sqlite_store().await;
        let store = Arc::new(GatedStore {
            inner: inner.clone(),
            started: Notify::new(),
            release: Notify::new(),
        });
        let hub = Arc::new(test_helpers::hub_with_store(store.clone()));
        let mut c1 = join(&hub, "c1").await;
        let mut c2 = join(&hub, "c2").await;

        let sending = {
            let hub = hub.clone();
            tokio::spawn(async move {
                hub.on_inbound_message("c1", &chat(json!({"content": "in flight"})))
                    .await
            })
        };

        store.started.notified().await;
        hub.on_connection_closed("c1").await;
        store.release.notify_one();

        let outcome = sending.await.unwrap().unwrap();
        assert_eq!(outcome, FanOut { delivered: 1, failed: 0 });

        let event = c2.recv().await.unwrap();
        assert_eq!(stored_payload(&event).content, "in flight");
        assert!(c1.try_recv().is_err());
        assert_eq!(inner.recent(10).await.unwrap().len(), 1);
    }
}
