//! The iteration loop: prompt, spawn, validate, score, commit or revert,
//! repeat.
//!
//! One invariant drives the whole loop: the best observed validation score
//! never decreases, and the worktree is never left below it for more than
//! one iteration. Completion requires both the secret echo and an all-pass
//! validation; the agent's self-claim alone is never trusted.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{progress, secret};
use crate::agent::AgentRegistry;
use crate::events::{payloads, EventKind, Journal};
use crate::prompt::{build_prompt, PrdContext, PromptContext};
use crate::subprocess::SubprocessManager;
use crate::validation::{failure_context, Validator};

#[derive(Debug, Clone)]
pub struct LoopRequest {
    pub thread_id: String,
    pub run_id: String,
    pub worktree: PathBuf,
    pub task: String,
    pub validation_commands: Vec<String>,
    pub max_iterations: u32,
    pub progress_file: String,
    pub failure_context_max_chars: usize,
    pub git_checkpoint: bool,
    pub agent: String,
    pub dry_run: bool,
    pub delay: Duration,
    pub prd: Option<PrdContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    pub success: bool,
    pub iterations: u32,
    pub cancelled: bool,
}

impl LoopOutcome {
    fn cancelled_after(iterations: u32) -> Self {
        Self {
            success: false,
            iterations,
            cancelled: true,
        }
    }
}

pub struct IterationEngine {
    subprocess: SubprocessManager,
    agents: AgentRegistry,
    journal: Journal,
    agent_timeout: Duration,
    validate_timeout: Option<Duration>,
}

impl IterationEngine {
    pub fn new(
        subprocess: SubprocessManager,
        agents: AgentRegistry,
        journal: Journal,
        agent_timeout: Duration,
        validate_timeout: Option<Duration>,
    ) -> Self {
        Self {
            subprocess,
            agents,
            journal,
            agent_timeout,
            validate_timeout,
        }
    }

    /// Drive one run to completion, exhaustion, or cancellation.
    pub async fn run(
        &self,
        request: &LoopRequest,
        cancel: &CancellationToken,
    ) -> anyhow::Result<LoopOutcome> {
        let completion_secret = secret::generate();
        self.run_with_secret(request, cancel, &completion_secret).await
    }

    pub(crate) async fn run_with_secret(
        &self,
        request: &LoopRequest,
        cancel: &CancellationToken,
        completion_secret: &str,
    ) -> anyhow::Result<LoopOutcome> {
        let adapter = self.agents.get(&request.agent)?;
        if !self
            .agents
            .is_installed(&request.agent, &self.subprocess)
            .await
            .unwrap_or(false)
        {
            tracing::warn!(
                "agent CLI `{}` does not appear to be installed; continuing anyway",
                adapter.binary()
            );
        }

        progress::init_if_missing(&request.worktree, &request.progress_file, &request.task)?;

        let validator = Validator::new(self.subprocess.clone(), self.validate_timeout);
        let git = self.subprocess.git();

        // Baseline establishes the high-water mark before the agent touches
        // anything. No event is emitted for it.
        let baseline = validator
            .run(&request.validation_commands, &request.worktree, cancel)
            .await;
        let mut best_score = baseline.score();
        tracing::info!(
            "run {} baseline: {}/{} passing",
            request.run_id,
            baseline.pass_count,
            baseline.total_count
        );

        let mut last_failure_output: Option<String> = None;
        let mut was_reverted = false;

        for iteration in 1..=request.max_iterations {
            if cancel.is_cancelled() {
                return Ok(LoopOutcome::cancelled_after(iteration - 1));
            }

            self.emit(
                request,
                EventKind::LoopIterationStarted,
                &payloads::IterationStarted { iteration },
            );

            let (progress_content, progress_exists) =
                progress::read(&request.worktree, &request.progress_file);

            let prompt = build_prompt(&PromptContext {
                task: &request.task,
                iteration,
                max_iterations: request.max_iterations,
                progress_content: &progress_content,
                progress_exists,
                progress_file: &request.progress_file,
                validation_commands: &request.validation_commands,
                completion_secret,
                last_failure_output: last_failure_output.as_deref(),
                was_reverted,
                prd: request.prd.as_ref(),
            });

            let spawn = adapter.build_command(&prompt, &request.worktree);
            if request.dry_run {
                tracing::info!(
                    "dry run: would spawn {} with {} args",
                    spawn.program,
                    spawn.args.len()
                );
                return Ok(LoopOutcome {
                    success: true,
                    iterations: 0,
                    cancelled: false,
                });
            }

            // A revert restores tracked files from HEAD; commits made by the
            // agent itself would survive it. Sample the starting commit so a
            // moved HEAD is caught after the revert.
            let head_at_start = if request.git_checkpoint {
                git.head(&request.worktree).await.ok()
            } else {
                None
            };

            self.emit(
                request,
                EventKind::LoopAgentSpawned,
                &payloads::AgentSpawned {
                    iteration,
                    agent: request.agent.clone(),
                },
            );

            let agent_result = self
                .subprocess
                .runner()
                .run(crate::subprocess::ProcessCommand {
                    program: spawn.program,
                    args: spawn.args,
                    env: Default::default(),
                    working_dir: Some(spawn.cwd),
                    timeout: Some(self.agent_timeout),
                    cancel: Some(cancel.clone()),
                })
                .await;

            self.emit(
                request,
                EventKind::LoopAgentExited,
                &payloads::AgentExited {
                    iteration,
                    exit_code: agent_result.exit_code,
                    elapsed_ms: agent_result.elapsed_ms,
                },
            );

            if cancel.is_cancelled() {
                return Ok(LoopOutcome::cancelled_after(iteration - 1));
            }

            let combined = format!("{}\n{}", agent_result.stdout, agent_result.stderr);
            let claimed_complete = secret::detect(&combined, completion_secret);

            // The validator always runs; the agent's claim is never trusted
            // on its own.
            let report = validator
                .run(&request.validation_commands, &request.worktree, cancel)
                .await;
            self.emit(
                request,
                EventKind::LoopValidationCompleted,
                &payloads::ValidationCompleted {
                    iteration,
                    pass_count: report.pass_count,
                    total_count: report.total_count,
                    all_passed: report.all_passed,
                },
            );
            if cancel.is_cancelled() {
                return Ok(LoopOutcome::cancelled_after(iteration - 1));
            }
            let current_score = report.score();

            if claimed_complete && report.all_passed {
                if request.git_checkpoint {
                    let message = match &request.prd {
                        Some(prd) => {
                            format!("ralph: [{}] complete (iteration {iteration})", prd.task_id)
                        }
                        None => format!("ralph: task complete (iteration {iteration})"),
                    };
                    git.commit_all(&request.worktree, &message).await;
                }
                tracing::info!(
                    "run {} completed on iteration {iteration}",
                    request.run_id
                );
                return Ok(LoopOutcome {
                    success: true,
                    iterations: iteration,
                    cancelled: false,
                });
            }

            if claimed_complete {
                tracing::warn!(
                    "run {}: agent echoed the completion secret but {}/{} validations pass",
                    request.run_id,
                    report.pass_count,
                    report.total_count
                );
            }

            if request.git_checkpoint {
                if current_score < best_score {
                    git.revert_to_head(&request.worktree).await;
                    if let (Some(before), Ok(after)) =
                        (&head_at_start, git.head(&request.worktree).await)
                    {
                        if *before != after {
                            tracing::warn!(
                                "run {}: revert expected HEAD {before} but found {after}; the agent committed on its own",
                                request.run_id
                            );
                        }
                    }
                    self.emit(
                        request,
                        EventKind::LoopRegressionReverted,
                        &payloads::RegressionReverted {
                            iteration,
                            score: current_score,
                            best_score,
                        },
                    );
                    tracing::warn!(
                        "run {} iteration {iteration} regressed ({current_score} < {best_score}); reverted",
                        request.run_id
                    );
                    was_reverted = true;
                } else {
                    was_reverted = false;
                    if current_score > best_score {
                        best_score = current_score;
                    }
                    let message = match &request.prd {
                        Some(prd) => format!(
                            "ralph: [{}] iteration {iteration} ({}/{} passing)",
                            prd.task_id, report.pass_count, report.total_count
                        ),
                        None => format!(
                            "ralph: iteration {iteration} ({}/{} passing)",
                            report.pass_count, report.total_count
                        ),
                    };
                    git.commit_all(&request.worktree, &message).await;
                    self.emit(
                        request,
                        EventKind::LoopCheckpointCommitted,
                        &payloads::CheckpointCommitted {
                            iteration,
                            score: current_score,
                            total: report.total_count,
                        },
                    );
                }
            } else {
                was_reverted = false;
            }

            last_failure_output = Some(failure_context(&report, request.failure_context_max_chars));

            if !request.delay.is_zero() && iteration < request.max_iterations {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Ok(LoopOutcome::cancelled_after(iteration));
                    }
                    _ = tokio::time::sleep(request.delay) => {}
                }
            }
        }

        Ok(LoopOutcome {
            success: false,
            iterations: request.max_iterations,
            cancelled: false,
        })
    }

    fn emit<P: serde::Serialize>(&self, request: &LoopRequest, kind: EventKind, payload: &P) {
        self.journal
            .emit_best_effort(&request.thread_id, Some(&request.run_id), kind, payload);
    }
}
