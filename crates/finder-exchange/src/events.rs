//! Event bus for contact exchange notifications.
//!
//! Events are broadcast to every subscriber; each subscriber has an
//! independent buffer, and a lagging subscriber loses the oldest events
//! rather than slowing publishers down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use finder_types::events::{ExchangeEvent, ExchangeEventType};
use finder_types::ids::{PostId, UserId};

use crate::ports::{EventPublisher, PublishError};

/// Filter a subscriber applies to the stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only these event types.
    pub event_types: Option<Vec<ExchangeEventType>>,
    /// Only events about these posts.
    pub post_ids: Option<Vec<PostId>>,
    /// Only events where this user is a party.
    pub party: Option<UserId>,
}

impl EventFilter {
    pub fn matches(&self, event: &ExchangeEvent) -> bool {
        if let Some(ref types) = self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(ref posts) = self.post_ids {
            if !posts.contains(&event.request.post_id) {
                return false;
            }
        }
        if let Some(ref user) = self.party {
            if !event.request.is_party(user) {
                return false;
            }
        }
        true
    }
}

/// Broadcast publisher.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExchangeEvent>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(&self, event: ExchangeEvent) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.sender.subscribe()
    }

    /// Number of events emitted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: ExchangeEvent) -> Result<(), PublishError> {
        self.emit(event);
        Ok(())
    }
}
