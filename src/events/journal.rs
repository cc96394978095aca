//! The event journal: persist, then fan out.
//!
//! Every append goes to the database first (assigning the monotonic id) and
//! is then delivered to live subscribers. Appends on a single thread are
//! totally ordered by the database; the broadcaster preserves that order per
//! subscriber.

use serde::Serialize;

use super::{Broadcaster, EventKind};
use crate::error::Result;
use crate::storage::{Database, EventRecord};

#[derive(Clone)]
pub struct Journal {
    db: Database,
    broadcaster: Broadcaster,
}

impl Journal {
    pub fn new(db: Database, broadcaster: Broadcaster) -> Self {
        Self { db, broadcaster }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Append a typed payload and stream the persisted record.
    pub fn emit<P: Serialize>(
        &self,
        thread_id: &str,
        run_id: Option<&str>,
        kind: EventKind,
        payload: &P,
    ) -> Result<EventRecord> {
        let payload = serde_json::to_value(payload)?;
        let event = self.db.append_event(thread_id, run_id, kind, payload)?;
        tracing::debug!("event {} {} (thread {})", event.id, kind, thread_id);
        self.broadcaster.publish(&event);
        Ok(event)
    }

    /// Like [`emit`](Self::emit) but swallows persistence errors after
    /// logging them. The iteration loop uses this: losing one journal row
    /// must not abort a run mid-iteration.
    pub fn emit_best_effort<P: Serialize>(
        &self,
        thread_id: &str,
        run_id: Option<&str>,
        kind: EventKind,
        payload: &P,
    ) {
        if let Err(e) = self.emit(thread_id, run_id, kind, payload) {
            tracing::warn!("failed to journal {kind}: {e}");
        }
    }
}
