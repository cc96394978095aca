//! Per-thread isolated worktrees.
//!
//! Every thread gets its own checkout under `<repo>/.ralph/worktrees/` on a
//! dedicated `ralph/thread-*` branch, so concurrent threads never touch each
//! other's files. Creation is not idempotent; callers keep the returned paths.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{RalphError, Result};
use crate::subprocess::SubprocessManager;

const WORKTREE_DIR: &str = ".ralph/worktrees";

#[derive(Debug, Clone)]
pub struct Worktree {
    pub repo_root: PathBuf,
    pub worktree_path: PathBuf,
    pub branch_name: String,
}

pub struct WorktreeManager {
    subprocess: SubprocessManager,
}

impl WorktreeManager {
    pub fn new(subprocess: SubprocessManager) -> Self {
        Self { subprocess }
    }

    /// Create the isolated worktree for a thread inside the repository that
    /// contains `repo_path`.
    ///
    /// On a name collision (the path or branch already exists) this retries
    /// exactly once with a timestamp suffix on both, then gives up with the
    /// VCS's stderr.
    pub async fn create_for_thread(&self, repo_path: &Path, thread_id: &str) -> Result<Worktree> {
        let git = self.subprocess.git();
        let repo_root = git.top_level(repo_path).await?;

        let short_id = short_thread_id(thread_id);
        let worktree_path = repo_root.join(WORKTREE_DIR).join(&short_id);
        let branch_name = format!("ralph/thread-{short_id}");

        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let first_attempt = if worktree_path.exists() {
            Err(format!("worktree path already exists: {}", worktree_path.display()))
        } else {
            git.add_worktree(&repo_root, &worktree_path, &branch_name).await
        };

        match first_attempt {
            Ok(()) => Ok(Worktree {
                repo_root,
                worktree_path,
                branch_name,
            }),
            Err(stderr) => {
                tracing::debug!(
                    "worktree collision for thread {thread_id}, retrying with suffix: {stderr}"
                );
                let suffix = Utc::now().timestamp();
                let worktree_path = repo_root
                    .join(WORKTREE_DIR)
                    .join(format!("{short_id}-{suffix}"));
                let branch_name = format!("ralph/thread-{short_id}-{suffix}");
                git.add_worktree(&repo_root, &worktree_path, &branch_name)
                    .await
                    .map_err(RalphError::WorktreeFailed)?;
                Ok(Worktree {
                    repo_root,
                    worktree_path,
                    branch_name,
                })
            }
        }
    }
}

/// Short filesystem-safe identifier derived from a thread id: alphanumerics
/// only, truncated to 10 characters, lowercased. An id with nothing usable
/// falls back to the literal `thread`.
fn short_thread_id(thread_id: &str) -> String {
    let filtered: String = thread_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(10)
        .collect::<String>()
        .to_lowercase();
    if filtered.is_empty() {
        "thread".to_string()
    } else {
        filtered
    }
}
