//! Event delivery to the outside world.
//!
//! Exchange events reach subscribers as JSON-RPC notifications on a socket
//! that called `subscribe_events`. Every event is also written to the log.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use finder_types::events::ExchangeEvent;

/// Notification method name used for pushed events.
pub const EVENT_METHOD: &str = "exchange_event";

/// JSON-RPC notification (no id, no reply expected).
#[derive(Debug, Serialize)]
pub struct RpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: &'a ExchangeEvent,
}

impl<'a> RpcNotification<'a> {
    pub fn event(event: &'a ExchangeEvent) -> Self {
        Self {
            jsonrpc: "2.0",
            method: EVENT_METHOD,
            params: event,
        }
    }
}

/// Log every event until the bus closes.
pub async fn log_events(mut rx: broadcast::Receiver<ExchangeEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => info!(
                event_type = %event.event_type,
                request = %event.request.id,
                post = %event.post.id,
                status = %event.request.status,
                "exchange event"
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
