// =============================================================================
// NOTIFY MODULE
// =============================================================================
// Real-time notification sink for ledger changes.
//
// publish() is fire-and-forget:
// - local WebSocket subscribers get the event through a tokio broadcast
//   channel (send never blocks; slow receivers just lag)
// - when Redis is configured, the event is also PUBLISHed on
//   "lottery-ledger:<topic>" from a spawned task so other instances can fan
//   it out too
// Delivery failures are logged and swallowed. A command that already
// committed never fails because nobody was listening.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::broadcast;

use crate::metrics;

/// Buffered events per subscriber before it starts lagging
const CHANNEL_CAPACITY: usize = 256;

/// Redis channel prefix
pub const REDIS_CHANNEL_PREFIX: &str = "lottery-ledger";

// -----------------------------------------------------------------------------
// TOPICS
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topic {
    /// Box scanned, manually entered, loaded or deactivated
    #[serde(rename = "box:update")]
    BoxUpdate,
    /// Box daily reset applied
    #[serde(rename = "box:reset")]
    BoxReset,
    /// Ticket pack registered, scanned or changed status
    #[serde(rename = "ticket:update")]
    TicketUpdate,
    /// Batch daily reset for a store
    #[serde(rename = "ticket:reset")]
    TicketReset,
    /// Daily sales record created or edited
    #[serde(rename = "sales:update")]
    SalesUpdate,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::BoxUpdate => "box:update",
            Topic::BoxReset => "box:reset",
            Topic::TicketUpdate => "ticket:update",
            Topic::TicketReset => "ticket:reset",
            Topic::SalesUpdate => "sales:update",
        }
    }
}

// -----------------------------------------------------------------------------
// EVENT ENVELOPE
// -----------------------------------------------------------------------------
/// What subscribers receive, serialized as
/// `{"type": "box:update", "storeId": "...", "data": {...}, "timestamp": "..."}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    #[serde(rename = "type")]
    pub topic: Topic,
    pub store_id: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

// -----------------------------------------------------------------------------
// NOTIFIER
// -----------------------------------------------------------------------------
#[derive(Clone)]
pub struct Notifier {
    local: broadcast::Sender<LedgerEvent>,
    redis: Option<redis::aio::ConnectionManager>,
}

impl Notifier {
    /// Local fan-out only
    pub fn new() -> Self {
        let (local, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { local, redis: None }
    }

    /// Local fan-out plus Redis PUBLISH
    pub fn with_redis(redis: redis::aio::ConnectionManager) -> Self {
        let mut notifier = Self::new();
        notifier.redis = Some(redis);
        notifier
    }

    /// New receiver for a WebSocket session
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.local.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.local.receiver_count()
    }

    /// Broadcast a change. Never fails, never waits on delivery.
    pub fn publish<T: Serialize>(&self, topic: Topic, store_id: &str, payload: &T) {
        let data = match serde_json::to_value(payload) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(topic = topic.as_str(), error = %e, "Failed to serialize notification");
                return;
            }
        };

        let event = LedgerEvent {
            topic,
            store_id: store_id.to_string(),
            data,
            timestamp: Utc::now(),
        };

        // Err only means no local subscribers right now
        if let Ok(delivered) = self.local.send(event.clone()) {
            tracing::debug!(topic = topic.as_str(), delivered, "Notification sent to local subscribers");
        }

        if let Some(redis) = &self.redis {
            let mut conn = redis.clone();
            tokio::spawn(async move {
                let channel = format!("{}:{}", REDIS_CHANNEL_PREFIX, event.topic.as_str());
                let body = match serde_json::to_string(&event) {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to encode notification for Redis");
                        return;
                    }
                };

                let start = Instant::now();
                let result: redis::RedisResult<i64> = redis::cmd("PUBLISH")
                    .arg(&channel)
                    .arg(body)
                    .query_async(&mut conn)
                    .await;
                metrics::record_redis_operation("publish", start.elapsed().as_secs_f64());

                if let Err(e) = result {
                    tracing::warn!(channel = %channel, error = %e, "Redis publish failed; notification dropped");
                }
            });
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
