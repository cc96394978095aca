//! Thread records: one persistent workstream per worktree.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::Database;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub name: String,
    pub task: String,
    pub repo_path: String,
    pub worktree_path: String,
    pub branch_name: String,
    pub agent: String,
    pub validate_commands: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<Thread> {
    let commands: String = row.get("validate_commands")?;
    Ok(Thread {
        id: row.get("id")?,
        name: row.get("name")?,
        task: row.get("task")?,
        repo_path: row.get("repo_path")?,
        worktree_path: row.get("worktree_path")?,
        branch_name: row.get("branch_name")?,
        agent: row.get("agent")?,
        validate_commands: serde_json::from_str(&commands).unwrap_or_default(),
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
        updated_at: parse_ts(&row.get::<_, String>("updated_at")?),
    })
}

pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

impl Database {
    pub fn insert_thread(&self, thread: &Thread) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO threads (id, name, task, repo_path, worktree_path, branch_name, agent, validate_commands, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                thread.id,
                thread.name,
                thread.task,
                thread.repo_path,
                thread.worktree_path,
                thread.branch_name,
                thread.agent,
                serde_json::to_string(&thread.validate_commands)?,
                thread.created_at.to_rfc3339(),
                thread.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_thread(&self, id: &str) -> Result<Option<Thread>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM threads WHERE id = ?1")?;
        let mut rows = stmt.query_map([id], thread_from_row)?;
        Ok(rows.next().transpose()?)
    }

    pub fn list_threads(&self) -> Result<Vec<Thread>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM threads ORDER BY created_at DESC")?;
        let threads = stmt
            .query_map([], thread_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(threads)
    }

    pub fn touch_thread(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE threads SET updated_at = ?2 WHERE id = ?1",
            rusqlite::params![id, at.to_rfc3339()],
        )?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::sample_thread;
    use super::*;

    #[test]
    fn test_insert_and_get_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let thread = sample_thread("t1");
        db.insert_thread(&thread).unwrap();

        let loaded = db.get_thread("t1").unwrap().unwrap();
        assert_eq!(loaded.name, thread.name);
        assert_eq!(loaded.validate_commands, vec!["cargo test"]);
        assert_eq!(loaded.agent, "claude");
    }

    #[test]
    fn test_worktree_path_is_unique() {
        let db = Database::open_in_memory().unwrap();
        let a = sample_thread("a");
        let mut b = sample_thread("b");
        b.worktree_path = a.worktree_path.clone();
        db.insert_thread(&a).unwrap();
        assert!(db.insert_thread(&b).is_err());
    }

    #[test]
    fn test_missing_thread_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_thread("nope").unwrap().is_none());
    }
}
