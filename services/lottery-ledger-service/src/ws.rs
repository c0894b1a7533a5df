// =============================================================================
// WEBSOCKET MODULE
// =============================================================================
// Live ledger updates for store dashboards.
//
// GET /ws?storeId=<store>
//
// An `x-store-id` header naming another store answers 404 before the upgrade.
//
// Each session subscribes to the notifier's broadcast channel and forwards
// the events of its own store as JSON text frames:
//   {"type": "box:update", "storeId": "...", "data": {...}, "timestamp": "..."}
// Client frames are ignored apart from Close.
// =============================================================================

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::{AppError, AppResult};
use crate::handlers::{scoped_store, StoreContext};
use crate::notify::LedgerEvent;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(rename = "storeId", default)]
    pub store_id: String,
}

/// Upgrade to a WebSocket subscribed to one store's events
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    session: Option<StoreContext>,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let store_id = subscription_store(params, session)?;

    // subscribe before the upgrade so nothing published in between is missed
    let notifier = state.service.notifier();
    let events = notifier.subscribe();
    tracing::info!(
        store_id = %store_id,
        subscribers = notifier.subscriber_count(),
        "WebSocket subscription requested"
    );

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, store_id, events)))
}

/// The store a session may subscribe to
fn subscription_store(params: WsParams, session: Option<StoreContext>) -> AppResult<String> {
    if params.store_id.trim().is_empty() {
        return Err(AppError::Validation("storeId query parameter is required".to_string()));
    }
    scoped_store(params.store_id, session)
}

async fn handle_socket(
    socket: WebSocket,
    store_id: String,
    mut events: broadcast::Receiver<LedgerEvent>,
) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Some(frame) = frame_for(&event, &store_id) else {
                        continue;
                    };
                    if sender.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(store_id = %store_id, skipped, "WebSocket subscriber lagging; events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(store_id = %store_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    tracing::info!(store_id = %store_id, "WebSocket session closed");
}

/// The text frame for `event`, or None if it belongs to another store
fn frame_for(event: &LedgerEvent, store_id: &str) -> Option<String> {
    if event.store_id != store_id {
        return None;
    }
    match serde_json::to_string(event) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode event for WebSocket");
            None
        }
    }
}
