//! Subprocess abstraction for agents, validation commands, and git.
//!
//! A trait-based runner with dependency injection: production code uses
//! [`TokioProcessRunner`], tests configure a [`MockProcessRunner`] with
//! expected calls. The runner never fails; spawn errors are synthesized into
//! a [`CommandResult`] with exit code 1.

pub mod builder;
pub mod git;
pub mod mock;
pub mod runner;

pub use builder::ProcessCommandBuilder;
pub use git::GitRunner;
pub use mock::MockProcessRunner;
pub use runner::{CommandResult, ProcessCommand, ProcessRunner, TokioProcessRunner};
pub use runner::{EXIT_CANCELLED, EXIT_TIMEOUT};

use std::sync::Arc;

/// Shared handle to the process runner, cloned into every component that
/// spawns subprocesses.
#[derive(Clone)]
pub struct SubprocessManager {
    runner: Arc<dyn ProcessRunner>,
}

impl SubprocessManager {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    pub fn production() -> Self {
        Self::new(Arc::new(TokioProcessRunner))
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }

    pub fn git(&self) -> GitRunner {
        GitRunner::new(Arc::clone(&self.runner))
    }
}
