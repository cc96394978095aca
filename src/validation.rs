//! Validation: the ordered command list that defines "done" objectively.
//!
//! Commands run through the shell so pipes and `&&` work. The score of a
//! report is simply how many commands exited 0; ties between iterations mean
//! "no change".

use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::subprocess::{ProcessCommandBuilder, SubprocessManager};

const TRUNCATION_SENTINEL: &str = "...(truncated)\n";

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub passed: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub results: Vec<CommandOutcome>,
    pub pass_count: usize,
    pub total_count: usize,
    pub all_passed: bool,
}

impl ValidationReport {
    /// Integer score: the number of passing commands, higher is better.
    pub fn score(&self) -> usize {
        self.pass_count
    }
}

pub struct Validator {
    subprocess: SubprocessManager,
    timeout: Option<Duration>,
}

impl Validator {
    pub fn new(subprocess: SubprocessManager, timeout: Option<Duration>) -> Self {
        Self { subprocess, timeout }
    }

    /// Run every command in order inside the worktree. Failures don't stop
    /// the list; each command's result is recorded either way.
    pub async fn run(
        &self,
        commands: &[String],
        worktree: &Path,
        cancel: &CancellationToken,
    ) -> ValidationReport {
        let mut results = Vec::with_capacity(commands.len());

        for command in commands {
            let mut builder = ProcessCommandBuilder::shell(command)
                .current_dir(worktree)
                .cancel(cancel.clone());
            if let Some(timeout) = self.timeout {
                builder = builder.timeout(timeout);
            }

            let output = self.subprocess.runner().run(builder.build()).await;
            let passed = output.success();
            tracing::debug!(
                "validation `{command}` {} in {}ms",
                if passed { "passed" } else { "failed" },
                output.elapsed_ms
            );
            results.push(CommandOutcome {
                command: command.clone(),
                passed,
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.exit_code,
                elapsed_ms: output.elapsed_ms,
            });
        }

        let pass_count = results.iter().filter(|r| r.passed).count();
        let total_count = results.len();
        ValidationReport {
            pass_count,
            total_count,
            all_passed: pass_count == total_count,
            results,
        }
    }
}

/// Format the failing commands of a report for the next iteration's prompt.
///
/// Each failing command contributes a `###` header and a fenced block holding
/// stderr if non-empty, else stdout. When the result exceeds `max_chars` the
/// head is dropped and the sentinel prepended: error output is most useful
/// near the end.
pub fn failure_context(report: &ValidationReport, max_chars: usize) -> String {
    let mut sections = Vec::new();
    for result in &report.results {
        if result.passed {
            continue;
        }
        let body = if result.stderr.is_empty() {
            &result.stdout
        } else {
            &result.stderr
        };
        sections.push(format!(
            "### {} (FAILED (exit code {}))\n```\n{}\n```\n",
            result.command, result.exit_code, body
        ));
    }

    let text = sections.concat();
    truncate_to_tail(&text, max_chars)
}

fn truncate_to_tail(text: &str, max_chars: usize) -> String {
    let total: usize = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(TRUNCATION_SENTINEL.chars().count());
    let tail: String = text.chars().skip(total - keep).collect();
    let out = format!("{TRUNCATION_SENTINEL}{tail}");
    // A cap smaller than the sentinel still honors the length bound.
    let out_len = out.chars().count();
    if out_len > max_chars {
        out.chars().skip(out_len - max_chars).collect()
    } else {
        out
    }
}
