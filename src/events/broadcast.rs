//! Live fan-out of journal events to subscribed observers.
//!
//! Built on `tokio::sync::broadcast`: each subscriber owns a bounded ring;
//! when a slow subscriber overflows, the oldest entries are dropped and the
//! receiver observes `Lagged(n)`, which the websocket layer forwards as a
//! system lag notice. The journal is never blocked by a slow observer.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::storage::EventRecord;

pub const BROADCAST_CAPACITY: usize = 256;

/// Envelope sent to live observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum StreamMessage {
    Events { event: EventRecord },
    System {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        skipped: Option<u64>,
    },
}

impl StreamMessage {
    pub fn connected() -> Self {
        StreamMessage::System {
            message: "connected".to_string(),
            skipped: None,
        }
    }

    pub fn lagged(skipped: u64) -> Self {
        StreamMessage::System {
            message: "lagged".to_string(),
            skipped: Some(skipped),
        }
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<EventRecord>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    /// Deliver an event to every current subscriber in append order.
    /// Subscribers that joined later never see earlier events (no backfill).
    pub fn publish(&self, event: &EventRecord) {
        // Send only fails when there are no subscribers, which is fine.
        let _ = self.sender.send(event.clone());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
