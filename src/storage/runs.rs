//! Run records and the run-status state machine.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::threads::parse_ts;
use super::Database;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(RunStatus::Queued),
            "running" => Some(RunStatus::Running),
            "paused" => Some(RunStatus::Paused),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub status: RunStatus,
    pub max_iterations: u32,
    pub iterations: u32,
    pub task_override: Option<String>,
    pub source_run_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(thread_id: &str, max_iterations: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            status: RunStatus::Queued,
            max_iterations,
            iterations: 0,
            task_override: None,
            source_run_id: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    let status: String = row.get("status")?;
    Ok(Run {
        id: row.get("id")?,
        thread_id: row.get("thread_id")?,
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
        max_iterations: row.get("max_iterations")?,
        iterations: row.get("iterations")?,
        task_override: row.get("task_override")?,
        source_run_id: row.get("source_run_id")?,
        error: row.get("error")?,
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
        started_at: row
            .get::<_, Option<String>>("started_at")?
            .map(|ts| parse_ts(&ts)),
        finished_at: row
            .get::<_, Option<String>>("finished_at")?
            .map(|ts| parse_ts(&ts)),
    })
}

impl Database {
    pub fn insert_run(&self, run: &Run) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO runs (id, thread_id, status, max_iterations, iterations, task_override, source_run_id, error, created_at, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                run.id,
                run.thread_id,
                run.status.as_str(),
                run.max_iterations,
                run.iterations,
                run.task_override,
                run.source_run_id,
                run.error,
                run.created_at.to_rfc3339(),
                run.started_at.map(|ts| ts.to_rfc3339()),
                run.finished_at.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> Result<Option<Run>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM runs WHERE id = ?1")?;
        let mut rows = stmt.query_map([id], run_from_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn run_status(&self, id: &str) -> Result<Option<RunStatus>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status FROM runs WHERE id = ?1")?;
        let mut rows = stmt.query_map([id], |row| row.get::<_, String>(0))?;
        Ok(rows.next().transpose()?.and_then(|s| RunStatus::parse(&s)))
    }

    pub fn list_runs_for_thread(&self, thread_id: &str) -> Result<Vec<Run>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT * FROM runs WHERE thread_id = ?1 ORDER BY created_at DESC")?;
        let runs = stmt
            .query_map([thread_id], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    /// Whether any run on the thread is currently executing. The queue uses
    /// this to serialize runs per thread.
    pub fn thread_has_running_run(&self, thread_id: &str) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn
            .prepare("SELECT COUNT(*) FROM runs WHERE thread_id = ?1 AND status = 'running'")?
            .query_row([thread_id], |row| row.get(0))?;
        Ok(count > 0)
    }

    pub fn set_run_status(&self, id: &str, status: RunStatus) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE runs SET status = ?2 WHERE id = ?1",
            rusqlite::params![id, status.as_str()],
        )?;
        Ok(())
    }

    pub fn mark_run_started(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE runs SET status = 'running', started_at = ?2 WHERE id = ?1",
            rusqlite::params![id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Move a run to a terminal status with its final iteration count.
    pub fn mark_run_finished(
        &self,
        id: &str,
        status: RunStatus,
        iterations: u32,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        debug_assert!(status.is_terminal());
        let conn = self.conn();
        conn.execute(
            "UPDATE runs SET status = ?2, iterations = ?3, error = ?4, finished_at = ?5 WHERE id = ?1",
            rusqlite::params![id, status.as_str(), iterations, error, at.to_rfc3339()],
        )?;
        Ok(())
    }
}
