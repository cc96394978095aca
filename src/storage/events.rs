//! Append-only event persistence.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::threads::parse_ts;
use super::Database;
use crate::error::Result;
use crate::events::EventKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: i64,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    let kind: String = row.get("type")?;
    let payload: String = row.get("payload")?;
    Ok(EventRecord {
        id: row.get("id")?,
        thread_id: row.get("thread_id")?,
        run_id: row.get("run_id")?,
        kind: EventKind::parse(&kind).unwrap_or(EventKind::RunFailed),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
    })
}

pub const DEFAULT_EVENT_LIMIT: usize = 200;

impl Database {
    /// Append an event; the identifier is assigned by the database and
    /// strictly increases. Events are never updated or deleted.
    pub fn append_event(
        &self,
        thread_id: &str,
        run_id: Option<&str>,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Result<EventRecord> {
        let created_at = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO events (thread_id, run_id, type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                thread_id,
                run_id,
                kind.as_str(),
                serde_json::to_string(&payload)?,
                created_at.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(EventRecord {
            id,
            thread_id: thread_id.to_string(),
            run_id: run_id.map(str::to_string),
            kind,
            payload,
            created_at,
        })
    }

    /// Newest-first events for a thread.
    pub fn events_for_thread(&self, thread_id: &str, limit: usize) -> Result<Vec<EventRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM events WHERE thread_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let events = stmt
            .query_map(rusqlite::params![thread_id, limit as i64], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    pub fn get_event(&self, id: i64) -> Result<Option<EventRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM events WHERE id = ?1")?;
        let mut rows = stmt.query_map([id], event_from_row)?;
        Ok(rows.next().transpose()?)
    }
}
