//! Relay metrics for observability
//!
//! Plain atomic counters, snapshotted on demand by the `/metrics` endpoint.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Connections
    pub active_connections: AtomicU64,
    pub total_connections: AtomicU64,

    // Messages
    /// Inbound chat events accepted for handling
    pub messages_received: AtomicU64,
    /// Messages fanned out (one per message, not per recipient)
    pub messages_broadcast: AtomicU64,
    /// Inbound events dropped as malformed
    pub messages_malformed: AtomicU64,

    // Deliveries (per recipient)
    pub deliveries_sent: AtomicU64,
    pub deliveries_failed: AtomicU64,

    // Store
    pub store_writes: AtomicU64,
    pub store_failures: AtomicU64,

    start_time: Option<Instant>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_malformed(&self) {
        self.messages_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast_completed(&self, delivered: usize, failed: usize) {
        self.messages_broadcast.fetch_add(1, Ordering::Relaxed);
        self.deliveries_sent
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.deliveries_failed
            .fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn store_write(&self) {
        self.store_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                broadcast: self.messages_broadcast.load(Ordering::Relaxed),
                malformed: self.messages_malformed.load(Ordering::Relaxed),
            },
            deliveries: DeliveryMetrics {
                sent: self.deliveries_sent.load(Ordering::Relaxed),
                failed: self.deliveries_failed.load(Ordering::Relaxed),
            },
            store: StoreMetrics {
                writes: self.store_writes.load(Ordering::Relaxed),
                failures: self.store_failures.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub deliveries: DeliveryMetrics,
    pub store: StoreMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub broadcast: u64,
    pub malformed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryMetrics {
    pub sent: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetrics {
    pub writes: u64,
    pub failures: u64,
}
