//! Typed events: the durable record of everything observable.
//!
//! The kind set is closed; payloads are built from the typed structs in
//! [`payloads`] and stored as opaque JSON so unknown fields written by a
//! newer build round-trip untouched.

pub mod broadcast;
pub mod journal;
pub mod payloads;

pub use broadcast::{Broadcaster, StreamMessage, BROADCAST_CAPACITY};
pub use journal::Journal;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "thread.created")]
    ThreadCreated,
    #[serde(rename = "thread.worktree.created")]
    ThreadWorktreeCreated,
    #[serde(rename = "review.comment.created")]
    ReviewCommentCreated,
    #[serde(rename = "review.rerun.queued")]
    ReviewRerunQueued,
    #[serde(rename = "automation.created")]
    AutomationCreated,
    #[serde(rename = "automation.triggered")]
    AutomationTriggered,
    #[serde(rename = "run.queued")]
    RunQueued,
    #[serde(rename = "run.started")]
    RunStarted,
    #[serde(rename = "run.paused")]
    RunPaused,
    #[serde(rename = "run.resumed")]
    RunResumed,
    #[serde(rename = "run.cancelled")]
    RunCancelled,
    #[serde(rename = "run.completed")]
    RunCompleted,
    #[serde(rename = "run.failed")]
    RunFailed,
    #[serde(rename = "loop.iteration.started")]
    LoopIterationStarted,
    #[serde(rename = "loop.agent.spawned")]
    LoopAgentSpawned,
    #[serde(rename = "loop.agent.exited")]
    LoopAgentExited,
    #[serde(rename = "loop.validation.completed")]
    LoopValidationCompleted,
    #[serde(rename = "loop.regression.reverted")]
    LoopRegressionReverted,
    #[serde(rename = "loop.checkpoint.committed")]
    LoopCheckpointCommitted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ThreadCreated => "thread.created",
            EventKind::ThreadWorktreeCreated => "thread.worktree.created",
            EventKind::ReviewCommentCreated => "review.comment.created",
            EventKind::ReviewRerunQueued => "review.rerun.queued",
            EventKind::AutomationCreated => "automation.created",
            EventKind::AutomationTriggered => "automation.triggered",
            EventKind::RunQueued => "run.queued",
            EventKind::RunStarted => "run.started",
            EventKind::RunPaused => "run.paused",
            EventKind::RunResumed => "run.resumed",
            EventKind::RunCancelled => "run.cancelled",
            EventKind::RunCompleted => "run.completed",
            EventKind::RunFailed => "run.failed",
            EventKind::LoopIterationStarted => "loop.iteration.started",
            EventKind::LoopAgentSpawned => "loop.agent.spawned",
            EventKind::LoopAgentExited => "loop.agent.exited",
            EventKind::LoopValidationCompleted => "loop.validation.completed",
            EventKind::LoopRegressionReverted => "loop.regression.reverted",
            EventKind::LoopCheckpointCommitted => "loop.checkpoint.committed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(raw.to_string())).ok()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
