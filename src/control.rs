//! The control plane: one explicit value owning the database, queue,
//! journal, agent registry, and subprocess layer. Constructed at startup and
//! passed by reference to every handler; there is no hidden ambient state.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentRegistry;
use crate::automation::{AutomationScheduler, CronExpr};
use crate::config::Config;
use crate::error::{RalphError, Result};
use crate::events::{payloads, Broadcaster, EventKind, Journal};
use crate::iteration::{IterationEngine, LoopOutcome, LoopRequest};
use crate::queue::{RunExecutor, RunQueue};
use crate::review;
use crate::storage::{
    Automation, Database, Run, RunStatus, ReviewComment, Thread,
};
use crate::subprocess::{ProcessRunner, SubprocessManager, TokioProcessRunner};
use crate::worktree::WorktreeManager;

pub struct ControlPlane {
    pub config: Config,
    pub db: Database,
    pub journal: Journal,
    pub queue: Arc<RunQueue>,
    pub agents: AgentRegistry,
    pub subprocess: SubprocessManager,
}

/// Run-control actions accepted over the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunAction {
    Pause,
    Resume,
    Stop,
    Retry,
}

impl ControlPlane {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let db = Database::open(&config.db_path)?;
        Self::assemble(config, db, Arc::new(TokioProcessRunner))
    }

    /// Control plane over an in-memory database and an injected process
    /// runner; used by tests.
    pub fn for_testing(runner: Arc<dyn ProcessRunner>) -> Result<Arc<Self>> {
        Self::for_testing_with_config(Config::default(), runner)
    }

    /// Like [`for_testing`](Self::for_testing), with a custom configuration.
    pub fn for_testing_with_config(
        config: Config,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Arc<Self>> {
        let db = Database::open_in_memory()?;
        Self::assemble(config, db, runner)
    }

    fn assemble(
        config: Config,
        db: Database,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Arc<Self>> {
        let subprocess = SubprocessManager::new(runner);
        let journal = Journal::new(db.clone(), Broadcaster::new());
        let agents = AgentRegistry::with_options(config.agent_options.clone());

        let executor = Arc::new(LoopExecutor {
            db: db.clone(),
            engine: IterationEngine::new(
                subprocess.clone(),
                agents.clone(),
                journal.clone(),
                config.agent_timeout,
                config.validate_timeout,
            ),
            config: config.clone(),
        });
        let queue = RunQueue::new(
            db.clone(),
            journal.clone(),
            executor,
            config.max_concurrent,
        );

        Ok(Arc::new(Self {
            config,
            db,
            journal,
            queue,
            agents,
            subprocess,
        }))
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        self.journal.broadcaster()
    }

    pub fn scheduler(&self) -> AutomationScheduler {
        AutomationScheduler::new(self.db.clone(), self.journal.clone(), Arc::clone(&self.queue))
    }

    /// Signal every running run and stop accepting new work; used on
    /// shutdown.
    pub fn shutdown(&self) {
        self.queue.cancel_all_running();
    }

    /// Create a thread together with its isolated worktree.
    pub async fn create_thread(
        &self,
        name: &str,
        task: &str,
        repo_path: &str,
        agent: Option<String>,
        validate: Option<Vec<String>>,
    ) -> Result<Thread> {
        if name.trim().is_empty() {
            return Err(RalphError::Input("thread name must not be empty".into()));
        }
        if task.trim().is_empty() {
            return Err(RalphError::Input("task must not be empty".into()));
        }
        let agent = agent.unwrap_or_else(|| "claude".to_string());
        if !self.agents.contains(&agent) {
            return Err(RalphError::AgentNotFound(agent));
        }

        let thread_id = uuid::Uuid::new_v4().to_string();
        let worktree = WorktreeManager::new(self.subprocess.clone())
            .create_for_thread(Path::new(repo_path), &thread_id)
            .await?;

        let now = Utc::now();
        let thread = Thread {
            id: thread_id,
            name: name.to_string(),
            task: task.to_string(),
            repo_path: worktree.repo_root.to_string_lossy().to_string(),
            worktree_path: worktree.worktree_path.to_string_lossy().to_string(),
            branch_name: worktree.branch_name.clone(),
            agent,
            validate_commands: validate.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        self.db.insert_thread(&thread)?;

        self.journal.emit_best_effort(
            &thread.id,
            None,
            EventKind::ThreadCreated,
            &payloads::ThreadCreated {
                name: thread.name.clone(),
                agent: thread.agent.clone(),
            },
        );
        self.journal.emit_best_effort(
            &thread.id,
            None,
            EventKind::ThreadWorktreeCreated,
            &payloads::WorktreeCreated {
                worktree_path: thread.worktree_path.clone(),
                branch_name: thread.branch_name.clone(),
            },
        );
        tracing::info!("thread {} created on branch {}", thread.id, thread.branch_name);
        Ok(thread)
    }

    pub fn get_thread(&self, thread_id: &str) -> Result<Thread> {
        self.db
            .get_thread(thread_id)?
            .ok_or_else(|| RalphError::NotFound(format!("thread {thread_id}")))
    }

    /// Create a queued run on a thread and hand it to the queue.
    pub fn create_run(
        &self,
        thread_id: &str,
        max_iterations: Option<u32>,
        task_override: Option<String>,
        source_run_id: Option<String>,
    ) -> Result<Run> {
        let thread = self.get_thread(thread_id)?;

        let mut run = Run::new(
            &thread.id,
            max_iterations.unwrap_or(self.config.max_iterations),
        );
        run.task_override = task_override;
        run.source_run_id = source_run_id;
        self.db.insert_run(&run)?;
        self.db.touch_thread(&thread.id, Utc::now())?;

        self.journal.emit_best_effort(
            &thread.id,
            Some(&run.id),
            EventKind::RunQueued,
            &payloads::RunLifecycle {
                source_run_id: run.source_run_id.clone(),
            },
        );
        self.queue.enqueue(&run.id);
        Ok(run)
    }

    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        self.db
            .get_run(run_id)?
            .ok_or_else(|| RalphError::NotFound(format!("run {run_id}")))
    }

    /// Apply a control action to a run. Illegal transitions surface as 409.
    pub fn control_run(&self, run_id: &str, action: RunAction) -> Result<Run> {
        let run = self.get_run(run_id)?;
        match action {
            RunAction::Pause => {
                if !self.queue.pause(run_id)? {
                    return Err(RalphError::IllegalTransition(format!(
                        "cannot pause a {} run",
                        run.status.as_str()
                    )));
                }
            }
            RunAction::Resume => {
                if !self.queue.resume(run_id)? {
                    return Err(RalphError::IllegalTransition(format!(
                        "cannot resume a {} run",
                        run.status.as_str()
                    )));
                }
            }
            RunAction::Stop => {
                if !self.queue.stop(run_id)? {
                    return Err(RalphError::IllegalTransition(format!(
                        "cannot stop a {} run",
                        run.status.as_str()
                    )));
                }
            }
            RunAction::Retry => {
                if !matches!(run.status, RunStatus::Failed | RunStatus::Cancelled) {
                    return Err(RalphError::IllegalTransition(format!(
                        "only failed or cancelled runs can be retried, run is {}",
                        run.status.as_str()
                    )));
                }
                return self.create_run(
                    &run.thread_id,
                    Some(run.max_iterations),
                    run.task_override.clone(),
                    Some(run.id.clone()),
                );
            }
        }
        self.get_run(run_id)
    }

    /// Raw uncolored diff of the thread's worktree.
    pub async fn thread_diff(&self, thread_id: &str) -> Result<String> {
        let thread = self.get_thread(thread_id)?;
        self.subprocess
            .git()
            .diff(Path::new(&thread.worktree_path))
            .await
    }

    pub fn create_comment(
        &self,
        thread_id: &str,
        run_id: Option<String>,
        file_path: String,
        line_number: u32,
        body: String,
    ) -> Result<ReviewComment> {
        let thread = self.get_thread(thread_id)?;
        if file_path.trim().is_empty() || body.trim().is_empty() {
            return Err(RalphError::Input(
                "filePath and body must not be empty".into(),
            ));
        }
        if line_number == 0 {
            return Err(RalphError::Input("lineNumber is 1-based".into()));
        }

        let comment = ReviewComment::new(&thread.id, run_id, file_path, line_number, body);
        self.db.insert_comment(&comment)?;
        self.journal.emit_best_effort(
            &thread.id,
            comment.run_id.as_deref(),
            EventKind::ReviewCommentCreated,
            &payloads::CommentCreated {
                comment_id: comment.id.clone(),
                file_path: comment.file_path.clone(),
                line_number: comment.line_number,
            },
        );
        Ok(comment)
    }

    /// Fold the selected comments into a new run's task override, mark them
    /// applied, and enqueue the run.
    pub fn rerun_from_comments(&self, thread_id: &str, comment_ids: &[String]) -> Result<Run> {
        let thread = self.get_thread(thread_id)?;
        if comment_ids.is_empty() {
            return Err(RalphError::Input("commentIds must not be empty".into()));
        }
        let comments = self.db.comments_by_ids(&thread.id, comment_ids)?;
        if comments.is_empty() {
            return Err(RalphError::NotFound(
                "no matching comments on this thread".into(),
            ));
        }

        let task_override = review::build_feedback_task(&thread.task, &comments);
        let source_run_id = comments[0].run_id.clone();

        let ids: Vec<String> = comments.iter().map(|c| c.id.clone()).collect();
        self.db.mark_comments_applied(&thread.id, &ids)?;

        let run = self.create_run(
            &thread.id,
            None,
            Some(task_override),
            source_run_id,
        )?;
        self.journal.emit_best_effort(
            &thread.id,
            Some(&run.id),
            EventKind::ReviewRerunQueued,
            &payloads::RerunQueued {
                new_run_id: run.id.clone(),
                comment_count: comments.len(),
            },
        );
        Ok(run)
    }

    pub fn create_automation(
        &self,
        name: &str,
        cron: &str,
        thread_id: &str,
        max_iterations: Option<u32>,
    ) -> Result<Automation> {
        if name.trim().is_empty() {
            return Err(RalphError::Input("automation name must not be empty".into()));
        }
        CronExpr::parse(cron)?;
        let thread = self.get_thread(thread_id)?;

        let automation = Automation::new(
            name.to_string(),
            cron.to_string(),
            thread.id.clone(),
            max_iterations.unwrap_or(self.config.max_iterations),
        );
        self.db.insert_automation(&automation)?;
        self.journal.emit_best_effort(
            &thread.id,
            None,
            EventKind::AutomationCreated,
            &payloads::AutomationCreated {
                automation_id: automation.id.clone(),
                name: automation.name.clone(),
                cron: automation.cron.clone(),
            },
        );
        Ok(automation)
    }
}

/// Bridges the queue to the iteration engine: loads the thread, assembles
/// the loop request, and runs it.
struct LoopExecutor {
    db: Database,
    engine: IterationEngine,
    config: Config,
}

#[async_trait]
impl RunExecutor for LoopExecutor {
    async fn execute(&self, run: Run, cancel: CancellationToken) -> anyhow::Result<LoopOutcome> {
        let thread = self
            .db
            .get_thread(&run.thread_id)?
            .with_context(|| format!("thread {} missing for run {}", run.thread_id, run.id))?;

        let request = LoopRequest {
            thread_id: thread.id.clone(),
            run_id: run.id.clone(),
            worktree: thread.worktree_path.clone().into(),
            task: run
                .task_override
                .clone()
                .unwrap_or_else(|| thread.task.clone()),
            validation_commands: thread.validate_commands.clone(),
            max_iterations: run.max_iterations,
            progress_file: Config::progress_file(&thread.id),
            failure_context_max_chars: self.config.failure_context_max_chars,
            git_checkpoint: self.config.git_checkpoint,
            agent: thread.agent.clone(),
            dry_run: false,
            delay: self.config.iteration_delay,
            prd: None,
        };

        self.engine.run(&request, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::MockProcessRunner;
    use tempfile::TempDir;

    fn control_with(mock: MockProcessRunner) -> Arc<ControlPlane> {
        ControlPlane::for_testing(Arc::new(mock)).unwrap()
    }

    fn mock_repo(mock: &mut MockProcessRunner, root: &Path) {
        let stdout = format!("{}\n", root.display());
        mock.expect("git")
            .with_args(|args| args == ["rev-parse", "--show-toplevel"])
            .returns_stdout(&stdout);
        mock.expect("git")
            .with_args(|args| args.first().map(String::as_str) == Some("worktree"))
            .returns_success();
    }

    async fn thread_fixture(control: &ControlPlane, repo: &Path) -> Thread {
        control
            .create_thread(
                "widget work",
                "build the widget",
                &repo.to_string_lossy(),
                None,
                Some(vec!["cargo test".to_string()]),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_thread_emits_events() {
        let repo = TempDir::new().unwrap();
        let mut mock = MockProcessRunner::new();
        mock_repo(&mut mock, repo.path());
        let control = control_with(mock);

        let thread = thread_fixture(&control, repo.path()).await;
        assert_eq!(thread.agent, "claude");
        assert!(thread.branch_name.starts_with("ralph/thread-"));

        let kinds: Vec<EventKind> = control
            .db
            .events_for_thread(&thread.id, 10)
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert!(kinds.contains(&EventKind::ThreadCreated));
        assert!(kinds.contains(&EventKind::ThreadWorktreeCreated));
    }

    #[tokio::test]
    async fn test_create_thread_unknown_agent() {
        let control = control_with(MockProcessRunner::new());
        let result = control
            .create_thread("x", "y", "/repo", Some("gemini".into()), None)
            .await;
        assert!(matches!(result, Err(RalphError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn test_create_run_missing_thread_is_404() {
        let control = control_with(MockProcessRunner::new());
        assert!(matches!(
            control.create_run("nope", None, None, None),
            Err(RalphError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_feedback_rerun_folds_marks_and_enqueues() {
        let repo = TempDir::new().unwrap();
        let mut mock = MockProcessRunner::new();
        mock_repo(&mut mock, repo.path());
        // The enqueued run's agent probe and loop subprocesses may fire in
        // the background; let them all fail harmlessly.
        let control = control_with(mock);
        let thread = thread_fixture(&control, repo.path()).await;

        let c1 = control
            .create_comment(&thread.id, None, "src/a.ts".into(), 10, "rename".into())
            .unwrap();
        let c2 = control
            .create_comment(&thread.id, None, "src/a.ts".into(), 22, "extract helper".into())
            .unwrap();

        let run = control
            .rerun_from_comments(&thread.id, &[c1.id.clone(), c2.id.clone()])
            .unwrap();

        let override_text = run.task_override.unwrap();
        assert!(override_text.contains("1. src/a.ts:10 - rename"));
        assert!(override_text.contains("2. src/a.ts:22 - extract helper"));

        for comment in control.db.comments_for_thread(&thread.id).unwrap() {
            assert_eq!(comment.status, crate::storage::CommentStatus::Applied);
        }

        let kinds: Vec<EventKind> = control
            .db
            .events_for_thread(&thread.id, 20)
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert!(kinds.contains(&EventKind::ReviewRerunQueued));
        assert!(kinds.contains(&EventKind::RunQueued));
    }

    #[tokio::test]
    async fn test_rerun_rejects_foreign_comments() {
        let repo = TempDir::new().unwrap();
        let mut mock = MockProcessRunner::new();
        mock_repo(&mut mock, repo.path());
        mock_repo(&mut mock, repo.path());
        let control = control_with(mock);

        let thread_a = thread_fixture(&control, repo.path()).await;
        let thread_b = thread_fixture(&control, repo.path()).await;
        let foreign = control
            .create_comment(&thread_b.id, None, "src/b.rs".into(), 5, "other".into())
            .unwrap();

        // A comment owned by another thread never crosses over.
        assert!(matches!(
            control.rerun_from_comments(&thread_a.id, &[foreign.id.clone()]),
            Err(RalphError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_retry_requires_terminal_failure() {
        let repo = TempDir::new().unwrap();
        let mut mock = MockProcessRunner::new();
        mock_repo(&mut mock, repo.path());
        let control = control_with(mock);
        let thread = thread_fixture(&control, repo.path()).await;

        let mut run = Run::new(&thread.id, 4);
        run.status = RunStatus::Completed;
        control.db.insert_run(&run).unwrap();
        assert!(matches!(
            control.control_run(&run.id, RunAction::Retry),
            Err(RalphError::IllegalTransition(_))
        ));

        let mut failed = Run::new(&thread.id, 4);
        failed.status = RunStatus::Failed;
        failed.task_override = Some("special".into());
        control.db.insert_run(&failed).unwrap();

        let retried = control.control_run(&failed.id, RunAction::Retry).unwrap();
        assert_eq!(retried.source_run_id.as_deref(), Some(failed.id.as_str()));
        assert_eq!(retried.task_override.as_deref(), Some("special"));
        assert_eq!(retried.max_iterations, 4);
        assert_eq!(retried.status, RunStatus::Queued);
    }

    #[tokio::test]
    async fn test_agent_options_reach_the_registry() {
        let config = Config {
            agent_options: vec![crate::agent::AgentOptions::Claude {
                model: Some("opus".into()),
                max_turns: Some(40),
                additional_flags: vec!["--verbose".into()],
            }],
            ..Config::default()
        };
        let control = ControlPlane::for_testing_with_config(
            config,
            Arc::new(MockProcessRunner::new()),
        )
        .unwrap();

        let spawn = control
            .agents
            .get("claude")
            .unwrap()
            .build_command("task", Path::new("/w"));
        let joined = spawn.args.join(" ");
        assert!(joined.contains("--model opus"));
        assert!(joined.contains("--max-turns 40"));
        assert!(joined.contains("--verbose"));
    }

    #[tokio::test]
    async fn test_automation_rejects_bad_cron() {
        let repo = TempDir::new().unwrap();
        let mut mock = MockProcessRunner::new();
        mock_repo(&mut mock, repo.path());
        let control = control_with(mock);
        let thread = thread_fixture(&control, repo.path()).await;

        assert!(matches!(
            control.create_automation("bad", "*/5 * * * *", &thread.id, None),
            Err(RalphError::Input(_))
        ));
        assert!(control
            .create_automation("good", "0 3 * * *", &thread.id, Some(5))
            .is_ok());
    }
}
