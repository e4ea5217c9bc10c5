//! Error types for the relay core.
//!
//! Everything here is contained at the hub boundary: none of these errors
//! reaches the listener or takes the process down.

/// Failures reported by a message store backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store was reached but declined the write.
    #[error("write rejected: {0}")]
    WriteRejected(String),
}

impl StoreError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Unavailable(_) => "store_unavailable",
            Self::WriteRejected(_) => "write_rejected",
        }
    }
}

/// Failures while handling one inbound event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HubError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::MalformedPayload(_) => "malformed_payload",
            Self::Store(e) => e.error_code(),
        }
    }

    /// Short message sent back to the originating connection.
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::MalformedPayload(_) => "malformed chat message",
            Self::Store(_) => "failed to save message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("connection already registered: {0}")]
    DuplicateConnection(String),
}

/// A single recipient could not be handed an outbound event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryFailure {
    #[error("connection {0} is closed")]
    Closed(String),

    #[error("send queue full for connection {0}")]
    QueueFull(String),
}
