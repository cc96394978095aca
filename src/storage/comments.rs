//! Review comments: inline per-line feedback on a thread's diff.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use super::threads::parse_ts;
use super::Database;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentStatus {
    Open,
    Applied,
}

impl CommentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentStatus::Open => "open",
            CommentStatus::Applied => "applied",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewComment {
    pub id: String,
    pub thread_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Free-form path; not verified against the current diff.
    pub file_path: String,
    /// 1-based line number in new-side coordinates.
    pub line_number: u32,
    pub body: String,
    pub status: CommentStatus,
    pub created_at: DateTime<Utc>,
}

impl ReviewComment {
    pub fn new(
        thread_id: &str,
        run_id: Option<String>,
        file_path: String,
        line_number: u32,
        body: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            run_id,
            file_path,
            line_number,
            body,
            status: CommentStatus::Open,
            created_at: Utc::now(),
        }
    }
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewComment> {
    let status: String = row.get("status")?;
    Ok(ReviewComment {
        id: row.get("id")?,
        thread_id: row.get("thread_id")?,
        run_id: row.get("run_id")?,
        file_path: row.get("file_path")?,
        line_number: row.get("line_number")?,
        body: row.get("body")?,
        status: if status == "applied" {
            CommentStatus::Applied
        } else {
            CommentStatus::Open
        },
        created_at: parse_ts(&row.get::<_, String>("created_at")?),
    })
}

impl Database {
    pub fn insert_comment(&self, comment: &ReviewComment) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO review_comments (id, thread_id, run_id, file_path, line_number, body, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                comment.id,
                comment.thread_id,
                comment.run_id,
                comment.file_path,
                comment.line_number,
                comment.body,
                comment.status.as_str(),
                comment.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn comments_for_thread(&self, thread_id: &str) -> Result<Vec<ReviewComment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM review_comments WHERE thread_id = ?1 ORDER BY created_at ASC",
        )?;
        let comments = stmt
            .query_map([thread_id], comment_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(comments)
    }

    /// Fetch comments by id, restricted to the given thread: a comment owned
    /// by another thread is silently excluded. Results follow the order of
    /// `ids`.
    pub fn comments_by_ids(&self, thread_id: &str, ids: &[String]) -> Result<Vec<ReviewComment>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT * FROM review_comments WHERE id = ?1 AND thread_id = ?2")?;
        let mut comments = Vec::new();
        for id in ids {
            let mut rows = stmt.query_map(rusqlite::params![id, thread_id], comment_from_row)?;
            if let Some(comment) = rows.next().transpose()? {
                comments.push(comment);
            }
        }
        Ok(comments)
    }

    /// Flip `open` comments to `applied`. Comments on other threads or
    /// already applied are untouched.
    pub fn mark_comments_applied(&self, thread_id: &str, ids: &[String]) -> Result<()> {
        let conn = self.conn();
        for id in ids {
            conn.execute(
                "UPDATE review_comments SET status = 'applied'
                 WHERE id = ?1 AND thread_id = ?2 AND status = 'open'",
                rusqlite::params![id, thread_id],
            )?;
        }
        Ok(())
    }
}
