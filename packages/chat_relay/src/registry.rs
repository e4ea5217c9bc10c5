//! Connection registry: every live WebSocket session, keyed by connection id.
//!
//! The registry owns the sending half of each connection's outbound queue.
//! Fan-out never blocks: a full or closed queue is a failed delivery for that
//! one recipient and the loop moves on.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use crate::error::{DeliveryFailure, RegistryError};
use crate::protocol::ServerEvent;

pub type OutboundEvent = Arc<ServerEvent>;

/// Lifecycle of one connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    /// Handshake finished and the connection is registered. Only valid from
    /// `Connecting`; returns whether the transition happened.
    pub fn open(&mut self) -> bool {
        if *self != ConnectionState::Connecting {
            return false;
        }
        *self = ConnectionState::Open;
        true
    }

    /// Move to `Closed`. Returns true only on the first call, so repeated
    /// close signals collapse into one unregister.
    pub fn close(&mut self) -> bool {
        let was_closed = *self == ConnectionState::Closed;
        *self = ConnectionState::Closed;
        !was_closed
    }
}

/// Handle to one live session.
#[derive(Debug, Clone)]
pub struct Connection {
    id: String,
    tx: mpsc::Sender<OutboundEvent>,
}

impl Connection {
    /// Create a connection with a bounded outbound queue. The receiver is
    /// drained by the transport's writer task.
    pub fn new(id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<OutboundEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { id: id.into(), tx }, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn deliver(&self, event: OutboundEvent) -> Result<(), DeliveryFailure> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::QueueFull(self.id.clone()),
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed(self.id.clone()),
        })
    }
}

/// Outcome of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection: Connection) -> Result<(), RegistryError> {
        let mut guard = self.connections.write().await;
        if guard.contains_key(connection.id()) {
            return Err(RegistryError::DuplicateConnection(connection.id.clone()));
        }
        debug!(conn_id = %connection.id, total = guard.len() + 1, "Connection registered");
        guard.insert(connection.id.clone(), connection);
        Ok(())
    }

    /// Remove a connection. Absent ids are ignored; returns whether anything
    /// was removed.
    pub async fn unregister(&self, id: &str) -> bool {
        let removed = self.connections.write().await.remove(id).is_some();
        if removed {
            debug!(conn_id = %id, "Connection unregistered");
        }
        removed
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.connections.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Call `f` with every registered connection, in no particular order.
    ///
    /// Works on a snapshot: connections registered or removed while the
    /// callbacks run may or may not be visited.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Connection),
    {
        let snapshot: Vec<Connection> = self.connections.read().await.values().cloned().collect();
        for connection in &snapshot {
            f(connection);
        }
    }

    /// Hand `event` to every registered connection, sender included.
    pub async fn broadcast(&self, event: ServerEvent) -> FanOut {
        let event = Arc::new(event);
        let mut outcome = FanOut::default();
        self.for_each(|connection| match connection.deliver(event.clone()) {
            Ok(()) => outcome.delivered += 1,
            Err(e) => {
                debug!(conn_id = %connection.id(), error = %e, "Delivery failed");
                outcome.failed += 1;
            }
        })
        .await;
        outcome
    }

    /// Send to one connection. An unregistered id counts as closed.
    pub async fn send_to(&self, id: &str, event: ServerEvent) -> Result<(), DeliveryFailure> {
        let connection = self.connections.read().await.get(id).cloned();
        match connection {
            Some(connection) => connection.deliver(Arc::new(event)),
            None => Err(DeliveryFailure::Closed(id.to_string())),
        }
    }
}
