//! Embedded SQLite persistence.
//!
//! One database file owns threads, runs, events, review comments, and
//! automations. Access goes through a serialized connection facade; every
//! write is a single statement. Missing columns are added lazily at startup
//! so old database files keep working across upgrades.

pub mod automations;
pub mod comments;
pub mod events;
pub mod runs;
pub mod threads;

pub use automations::Automation;
pub use comments::{CommentStatus, ReviewComment};
pub use events::EventRecord;
pub use runs::{Run, RunStatus};
pub use threads::Thread;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::Result;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at `path` and bootstrap the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_schema(&self) -> Result<()> {
        {
            let conn = self.conn();
            conn.execute_batch(SCHEMA_SQL)?;
        }
        // Columns that arrived after the original schema are added in place
        // when an older database file is opened.
        self.ensure_column("runs", "task_override", "TEXT")?;
        self.ensure_column("runs", "source_run_id", "TEXT")?;
        self.ensure_column("automations", "last_triggered", "TEXT")?;
        Ok(())
    }

    fn ensure_column(&self, table: &str, column: &str, decl: &str) -> Result<()> {
        let conn = self.conn();
        let exists: bool = conn
            .prepare(&format!(
                "SELECT COUNT(*) FROM pragma_table_info('{table}') WHERE name = ?1"
            ))?
            .query_row([column], |row| row.get::<_, i64>(0))
            .map(|count| count > 0)?;
        if !exists {
            tracing::info!("adding missing column {table}.{column}");
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl};"))?;
        }
        Ok(())
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    task TEXT NOT NULL,
    repo_path TEXT NOT NULL,
    worktree_path TEXT NOT NULL UNIQUE,
    branch_name TEXT NOT NULL,
    agent TEXT NOT NULL,
    validate_commands TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL REFERENCES threads(id),
    status TEXT NOT NULL,
    max_iterations INTEGER NOT NULL,
    iterations INTEGER NOT NULL DEFAULT 0,
    task_override TEXT,
    source_run_id TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_runs_thread ON runs(thread_id, created_at DESC);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id TEXT NOT NULL,
    run_id TEXT,
    type TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_thread ON events(thread_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_events_run ON events(run_id, created_at DESC);

CREATE TABLE IF NOT EXISTS review_comments (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL REFERENCES threads(id),
    run_id TEXT,
    file_path TEXT NOT NULL,
    line_number INTEGER NOT NULL,
    body TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_comments_thread ON review_comments(thread_id);

CREATE TABLE IF NOT EXISTS automations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    cron TEXT NOT NULL,
    thread_id TEXT NOT NULL REFERENCES threads(id),
    max_iterations INTEGER NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    last_triggered TEXT
);
"#;
