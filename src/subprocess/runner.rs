use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

/// A fully specified subprocess invocation.
///
/// The program is always executed with an explicit argv. Shell execution is
/// opt-in through [`ProcessCommandBuilder::shell`](super::ProcessCommandBuilder::shell)
/// and reserved for validation commands.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

/// What running a subprocess produced.
///
/// This is plain data, never an error: spawn failures are synthesized into an
/// exit code 1 result with the message in stderr, so callers can treat every
/// outcome uniformly and score it.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub elapsed_ms: u64,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Synthesized result for a process that could not be spawned.
    pub fn spawn_failure(message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: 1,
            elapsed_ms,
        }
    }
}

/// Exit code reported when the command was cancelled from the outside.
pub const EXIT_CANCELLED: i32 = 130;
/// Exit code reported when the command exceeded its timeout.
pub const EXIT_TIMEOUT: i32 = 124;

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> CommandResult;
}

pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> CommandResult {
        let start = std::time::Instant::now();

        tracing::debug!(
            "spawning subprocess: {} {}",
            command.program,
            command.args.join(" ")
        );

        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args);
        // Caller env merges over the inherited process environment.
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as u64;
                tracing::warn!("failed to spawn {}: {}", command.program, e);
                return CommandResult::spawn_failure(
                    format!("failed to spawn {}: {}", command.program, e),
                    elapsed,
                );
            }
        };

        // Drain both pipes concurrently so a chatty child cannot deadlock on
        // a full pipe buffer while we wait on the other stream.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let cancel = command.cancel.clone().unwrap_or_default();
        let timeout = command.timeout.unwrap_or(Duration::MAX);

        enum Waited {
            Status(std::io::Result<std::process::ExitStatus>),
            TimedOut,
            Cancelled,
        }

        // The wait future borrows the child, so the kill happens after the
        // select resolves and the borrow is released.
        let waited = tokio::select! {
            waited = tokio::time::timeout(timeout, child.wait()) => match waited {
                Ok(status) => Waited::Status(status),
                Err(_) => Waited::TimedOut,
            },
            _ = cancel.cancelled() => Waited::Cancelled,
        };

        let exit_code = match waited {
            Waited::Status(Ok(status)) => status.code().unwrap_or(1),
            Waited::Status(Err(_)) => 1,
            Waited::TimedOut => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                EXIT_TIMEOUT
            }
            Waited::Cancelled => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                EXIT_CANCELLED
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let mut stderr = String::from_utf8_lossy(&stderr).to_string();
        if exit_code == EXIT_TIMEOUT && stderr.is_empty() {
            stderr = format!("process timed out after {:?}", timeout);
        }

        if exit_code != 0 {
            tracing::debug!(
                "subprocess {} exited with code {} in {}ms",
                command.program,
                exit_code,
                elapsed_ms
            );
        }

        CommandResult {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr,
            exit_code,
            elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::ProcessCommandBuilder;

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let runner = TokioProcessRunner;
        let result = runner
            .run(ProcessCommandBuilder::new("echo").arg("hello").build())
            .await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
        assert!(result.success());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_synthesized() {
        let runner = TokioProcessRunner;
        let result = runner
            .run(ProcessCommandBuilder::new("definitely-not-a-real-binary-xyz").build())
            .await;
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_data_not_error() {
        let runner = TokioProcessRunner;
        let result = runner
            .run(ProcessCommandBuilder::shell("exit 3").build())
            .await;
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = TokioProcessRunner;
        let result = runner
            .run(
                ProcessCommandBuilder::shell("sleep 30")
                    .timeout(Duration::from_millis(100))
                    .build(),
            )
            .await;
        assert_eq!(result.exit_code, EXIT_TIMEOUT);
        assert!(result.elapsed_ms < 5_000);
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let runner = TokioProcessRunner;
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let result = runner
            .run(
                ProcessCommandBuilder::shell("sleep 30")
                    .cancel(token)
                    .build(),
            )
            .await;
        assert_eq!(result.exit_code, EXIT_CANCELLED);
    }

    #[tokio::test]
    async fn test_env_merges_over_process_env() {
        let runner = TokioProcessRunner;
        let result = runner
            .run(
                ProcessCommandBuilder::shell("echo $RALPH_TEST_VAR")
                    .env("RALPH_TEST_VAR", "forty-two")
                    .build(),
            )
            .await;
        assert_eq!(result.stdout.trim(), "forty-two");
    }
}
