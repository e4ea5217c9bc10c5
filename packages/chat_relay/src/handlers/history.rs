use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

use crate::AppState;
use crate::error::StoreError;
use crate::models::HistoryEntry;

/// GET /past-message
///
/// Most recent persisted messages, oldest first. No store or an unreachable
/// store both mean "no history" and answer `[]`.
pub async fn past_messages_handler(State(state): State<AppState>) -> Response {
    let limit = state.config.store.history_limit;

    match state.hub.history(limit).await {
        Ok(messages) => {
            debug!(count = messages.len(), "Serving message history");
            let entries: Vec<HistoryEntry> = messages.into_iter().map(HistoryEntry::from).collect();
            Json(entries).into_response()
        }
        Err(StoreError::Unavailable(reason)) => {
            warn!(error = %reason, "Message store unavailable; serving empty history");
            Json(Vec::<HistoryEntry>::new()).into_response()
        }
        Err(e) => {
            error!(code = e.error_code(), error = %e, "Failed to load message history");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string(), "code": e.error_code() })),
            )
                .into_response()
        }
    }
}
