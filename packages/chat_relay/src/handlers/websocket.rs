//! WebSocket transport.
//!
//! Each connection runs three pieces:
//! - a reader loop that pulls frames off the socket into an inbound queue,
//! - a dispatch task that feeds that queue to the hub one message at a time,
//! - a writer task that drains the outbound queue (and sends keepalive pings).
//!
//! A connection's own messages are therefore handled in arrival order while
//! different connections interleave freely.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::SplitSink, stream::StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Interval, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::config::CorsConfig;
use crate::error::RegistryError;
use crate::hub::Hub;
use crate::registry::{Connection, ConnectionState, OutboundEvent};

/// GET /ws
pub async fn websocket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    if !origin_allowed(&state.config.cors, origin) {
        warn!(origin = ?origin, "Rejected WebSocket from disallowed origin");
        return StatusCode::FORBIDDEN.into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Browsers always send `Origin` on WebSocket handshakes; non-browser clients
/// may omit it and are let through.
fn origin_allowed(cors: &CorsConfig, origin: Option<&str>) -> bool {
    match origin {
        _ if cors.is_open() => true,
        None => true,
        Some(origin) => cors.allowed_origins.iter().any(|o| o == origin),
    }
}

/// Time the writer gets to flush the close handshake after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One connection's identity and lifecycle, shared by its reader and writer.
/// Either side may see the socket die first.
struct Session {
    id: String,
    hub: Arc<Hub>,
    state: Mutex<ConnectionState>,
}

impl Session {
    fn new(id: impl Into<String>, hub: Arc<Hub>) -> Self {
        Self {
            id: id.into(),
            hub,
            state: Mutex::new(ConnectionState::Connecting),
        }
    }

    async fn open(&self, connection: Connection) -> Result<(), RegistryError> {
        self.hub.on_connection_opened(connection).await?;
        self.state.lock().await.open();
        Ok(())
    }

    /// The first close signal unregisters; later ones are no-ops.
    async fn close(&self, reason: &'static str) {
        let first = self.state.lock().await.close();
        if first {
            self.hub.on_connection_closed(&self.id).await;
            info!(conn_id = %self.id, reason, "Client disconnected");
        }
    }
}

pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let capacity = state.config.server.send_queue_capacity;
    let session = Arc::new(Session::new(
        uuid::Uuid::new_v4().to_string(),
        state.hub.clone(),
    ));
    let conn_id = session.id.clone();

    let (connection, outbound_rx) = Connection::new(conn_id.clone(), capacity);
    if let Err(e) = session.open(connection).await {
        error!(conn_id = %conn_id, error = %e, "Failed to register connection");
        return;
    }
    info!(conn_id = %conn_id, "Client connected");

    let (ws_sender, mut ws_receiver) = socket.split();

    let mut writer = tokio::spawn(writer_task(
        ws_sender,
        outbound_rx,
        state.config.server.ping_interval,
        session.clone(),
    ));

    // Inbound queue: the reader only enqueues, the dispatcher awaits the hub.
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<String>(capacity);
    let hub = state.hub.clone();
    let dispatch_id = conn_id.clone();
    tokio::spawn(async move {
        while let Some(text) = inbound_rx.recv().await {
            if let Err(e) = hub.on_inbound_message(&dispatch_id, &text).await {
                debug!(conn_id = %dispatch_id, error = %e, "Inbound message not relayed");
            }
        }
    });

    let reason = loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                if inbound_tx.send(text.to_string()).await.is_err() {
                    break "dispatcher stopped";
                }
            }
            Some(Ok(Message::Binary(_))) => {
                debug!(conn_id = %conn_id, "Binary frames not supported");
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(conn_id = %conn_id, frame = ?frame, "Client initiated close");
                break "client closed";
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break "receive error";
            }
            None => break "stream ended",
        }
    };

    // Unregistering drops the registry's sender, so the writer drains what is
    // queued, flushes the close reply and exits. Whatever the dispatcher is
    // still working on finishes and fans out to the remaining connections.
    session.close(reason).await;
    drop(inbound_tx);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        debug!(conn_id = %conn_id, "Writer did not finish in time");
        writer.abort();
    }
}

async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundEvent>,
    ping_interval: Option<Duration>,
    session: Arc<Session>,
) {
    let mut ticker = ping_interval.map(|period| {
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let msg = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => match serde_json::to_string(&*event) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                },
                None => break,
            },
            _ = next_tick(&mut ticker) => Message::Ping(Default::default()),
        };

        if ws_sender.send(msg).await.is_err() {
            session.close("send failed").await;
            return;
        }
    }

    let _ = ws_sender.close().await;
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
