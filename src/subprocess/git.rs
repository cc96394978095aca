//! Git operations used by the worktree manager and the iteration loop.
//!
//! Every invocation is argv-form through the process runner; commit messages
//! and branch names are passed as single arguments and never interpolated.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::builder::ProcessCommandBuilder;
use super::runner::{CommandResult, ProcessRunner};
use crate::error::{RalphError, Result};

pub struct GitRunner {
    runner: Arc<dyn ProcessRunner>,
}

impl GitRunner {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Resolve the top-level directory of the repository containing `path`.
    pub async fn top_level(&self, path: &Path) -> Result<PathBuf> {
        let result = self
            .runner
            .run(
                ProcessCommandBuilder::new("git")
                    .args(["rev-parse", "--show-toplevel"])
                    .current_dir(path)
                    .build(),
            )
            .await;
        if !result.success() {
            return Err(RalphError::NotARepository(path.to_path_buf()));
        }
        Ok(PathBuf::from(result.stdout.trim()))
    }

    /// Create a new worktree at `worktree_path` on a new `branch`.
    /// Returns git's stderr on failure so callers can retry or report it.
    pub async fn add_worktree(
        &self,
        repo: &Path,
        worktree_path: &Path,
        branch: &str,
    ) -> std::result::Result<(), String> {
        let result = self
            .runner
            .run(
                ProcessCommandBuilder::new("git")
                    .args(["worktree", "add", "-b", branch])
                    .arg(&worktree_path.to_string_lossy())
                    .current_dir(repo)
                    .build(),
            )
            .await;
        if result.success() {
            Ok(())
        } else {
            Err(result.stderr.trim().to_string())
        }
    }

    /// Restore all tracked files to HEAD and remove untracked files and
    /// directories. This is the total revert used on regression.
    pub async fn revert_to_head(&self, worktree: &Path) -> CommandResult {
        let checkout = self
            .runner
            .run(
                ProcessCommandBuilder::new("git")
                    .args(["checkout", "--", "."])
                    .current_dir(worktree)
                    .build(),
            )
            .await;
        if !checkout.success() {
            return checkout;
        }
        self.runner
            .run(
                ProcessCommandBuilder::new("git")
                    .args(["clean", "-fd"])
                    .current_dir(worktree)
                    .build(),
            )
            .await
    }

    /// Stage everything and commit. A non-zero exit (including "nothing to
    /// commit") is returned as data, mirroring the rest of the runner.
    pub async fn commit_all(&self, worktree: &Path, message: &str) -> CommandResult {
        let add = self
            .runner
            .run(
                ProcessCommandBuilder::new("git")
                    .args(["add", "-A"])
                    .current_dir(worktree)
                    .build(),
            )
            .await;
        if !add.success() {
            return add;
        }
        self.runner
            .run(
                ProcessCommandBuilder::new("git")
                    .args(["commit", "-m", message])
                    .current_dir(worktree)
                    .build(),
            )
            .await
    }

    /// Uncolored diff of the worktree against HEAD.
    pub async fn diff(&self, worktree: &Path) -> Result<String> {
        let result = self
            .runner
            .run(
                ProcessCommandBuilder::new("git")
                    .args(["diff", "--no-color", "HEAD"])
                    .current_dir(worktree)
                    .build(),
            )
            .await;
        if !result.success() {
            return Err(RalphError::Subprocess(format!(
                "git diff: {}",
                result.stderr.trim()
            )));
        }
        Ok(result.stdout)
    }

    /// Current HEAD commit hash.
    pub async fn head(&self, worktree: &Path) -> Result<String> {
        let result = self
            .runner
            .run(
                ProcessCommandBuilder::new("git")
                    .args(["rev-parse", "HEAD"])
                    .current_dir(worktree)
                    .build(),
            )
            .await;
        if !result.success() {
            return Err(RalphError::Subprocess(format!(
                "git rev-parse HEAD: {}",
                result.stderr.trim()
            )));
        }
        Ok(result.stdout.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::mock::MockProcessRunner;

    #[tokio::test]
    async fn test_top_level_fails_outside_repository() {
        let mut mock = MockProcessRunner::new();
        mock.expect("git")
            .with_args(|args| args == ["rev-parse", "--show-toplevel"])
            .returns_stderr("fatal: not a git repository")
            .returns_exit_code(128);

        let git = GitRunner::new(Arc::new(mock));
        let result = git.top_level(Path::new("/tmp/nowhere")).await;
        assert!(matches!(result, Err(RalphError::NotARepository(_))));
    }

    #[tokio::test]
    async fn test_add_worktree_surfaces_stderr() {
        let mut mock = MockProcessRunner::new();
        mock.expect("git")
            .with_args(|args| args.first().map(String::as_str) == Some("worktree"))
            .returns_stderr("fatal: branch already exists")
            .returns_exit_code(128);

        let git = GitRunner::new(Arc::new(mock));
        let err = git
            .add_worktree(Path::new("/repo"), Path::new("/repo/.ralph/worktrees/x"), "ralph/thread-x")
            .await
            .unwrap_err();
        assert!(err.contains("branch already exists"));
    }

    #[tokio::test]
    async fn test_commit_message_is_single_argument() {
        let mut mock = MockProcessRunner::new();
        mock.expect("git")
            .with_args(|args| args.first().map(String::as_str) == Some("add"))
            .returns_success();
        mock.expect("git")
            .with_args(|args| args.first().map(String::as_str) == Some("commit"))
            .returns_success();

        let git = GitRunner::new(Arc::new(mock.clone()));
        let message = "ralph: iteration 1 (1/2 passing) ✓ üñíçødé";
        git.commit_all(Path::new("/w"), message).await;

        let calls = mock.calls();
        let commit = calls
            .iter()
            .find(|c| c.args.first().map(String::as_str) == Some("commit"))
            .unwrap();
        assert_eq!(commit.args, vec!["commit", "-m", message]);
    }
}
