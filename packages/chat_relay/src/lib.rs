//! Real-time chat relay.
//!
//! Clients connect over WebSocket and every chat event one of them sends is
//! fanned out to all open connections. With a message store configured the
//! relay persists each message first and serves recent history over HTTP.

use axum::{Router, http::Method, routing::get};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::warn;
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod metrics;
pub mod models;
pub mod protocol;
pub mod registry;
pub mod store;

#[cfg(test)]
mod test_helpers;

use crate::config::{CorsConfig, RelayConfig};
use crate::hub::Hub;
use crate::metrics::RelayMetrics;
use crate::registry::ConnectionRegistry;
use crate::store::SharedStore;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub config: Arc<RelayConfig>,
    /// Relay counters for observability
    pub metrics: Arc<RelayMetrics>,
}

impl AppState {
    /// Wire registry, hub and metrics around an optional store.
    pub fn new(config: RelayConfig, store: Option<SharedStore>) -> Self {
        let metrics = Arc::new(RelayMetrics::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = Hub::new(registry, store, metrics.clone())
            .with_shared_room(config.store.shared_room.clone());

        Self {
            hub: Arc::new(hub),
            config: Arc::new(config),
            metrics,
        }
    }
}

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if cors.is_open() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<_> = cors
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %o, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// All HTTP and WebSocket routes. Anything unmatched falls through to the
/// static client directory.
pub fn build_router(state: AppState) -> Router {
    let static_dir = ServeDir::new(&state.config.server.static_dir);
    let cors = cors_layer(&state.config.cors);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/past-message", get(handlers::past_messages_handler))
        .route("/ws", get(handlers::websocket_handler))
        .fallback_service(static_dir)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(cors)
        .with_state(state)
}
