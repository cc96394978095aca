//! The run queue: admission control and lifecycle for queued runs.
//!
//! Three disjoint collections keyed by run id: `pending` (FIFO), `running`,
//! and `controllers` (cancellation handles for running runs). At most
//! `max_concurrent` runs execute at once, and runs on the same thread are
//! serialized so they never race on the thread's worktree.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::events::{payloads, EventKind, Journal};
use crate::iteration::LoopOutcome;
use crate::storage::{Database, Run, RunStatus};

/// Error string recorded when a run exhausts its budget.
pub const EXHAUSTED_ERROR: &str = "Loop ended before completion";

#[async_trait]
pub trait RunExecutor: Send + Sync {
    async fn execute(&self, run: Run, cancel: CancellationToken) -> anyhow::Result<LoopOutcome>;
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    running: HashSet<String>,
    /// Threads with a run in flight; claimed under the same lock as
    /// `running` so two same-thread runs can never both be admitted.
    running_threads: HashSet<String>,
    controllers: HashMap<String, CancellationToken>,
}

pub struct RunQueue {
    state: Mutex<QueueState>,
    max_concurrent: usize,
    db: Database,
    journal: Journal,
    executor: Arc<dyn RunExecutor>,
}

impl RunQueue {
    pub fn new(
        db: Database,
        journal: Journal,
        executor: Arc<dyn RunExecutor>,
        max_concurrent: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            max_concurrent: max_concurrent.max(1),
            db,
            journal,
            executor,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().unwrap().running.len()
    }

    /// Add an already-persisted `queued` run to the tail of the queue.
    pub fn enqueue(self: &Arc<Self>, run_id: &str) {
        self.state
            .lock()
            .unwrap()
            .pending
            .push_back(run_id.to_string());
        self.tick();
    }

    /// Pause a run. Only pending runs can pause; anything else is a no-op
    /// returning false with no event emitted.
    pub fn pause(&self, run_id: &str) -> Result<bool> {
        let removed = {
            let mut state = self.state.lock().unwrap();
            match state.pending.iter().position(|id| id == run_id) {
                Some(index) => {
                    state.pending.remove(index);
                    true
                }
                None => false,
            }
        };
        if !removed {
            return Ok(false);
        }
        self.db.set_run_status(run_id, RunStatus::Paused)?;
        self.emit_lifecycle(run_id, EventKind::RunPaused)?;
        Ok(true)
    }

    /// Resume a paused run back into the queue.
    pub fn resume(self: &Arc<Self>, run_id: &str) -> Result<bool> {
        match self.db.run_status(run_id)? {
            Some(RunStatus::Paused) => {}
            _ => return Ok(false),
        }
        self.db.set_run_status(run_id, RunStatus::Queued)?;
        self.emit_lifecycle(run_id, EventKind::RunResumed)?;
        self.enqueue(run_id);
        Ok(true)
    }

    /// Stop a run: a pending run is cancelled immediately; a running run has
    /// its cancellation handle signalled and the executor's finalizer records
    /// the cancelled status. Anything else is a no-op returning false.
    pub fn stop(&self, run_id: &str) -> Result<bool> {
        let removed_from_pending = {
            let mut state = self.state.lock().unwrap();
            match state.pending.iter().position(|id| id == run_id) {
                Some(index) => {
                    state.pending.remove(index);
                    true
                }
                None => false,
            }
        };
        if removed_from_pending {
            let iterations = self
                .db
                .get_run(run_id)?
                .map(|run| run.iterations)
                .unwrap_or(0);
            self.db.mark_run_finished(
                run_id,
                RunStatus::Cancelled,
                iterations,
                None,
                Utc::now(),
            )?;
            self.emit_lifecycle(run_id, EventKind::RunCancelled)?;
            return Ok(true);
        }

        let controller = self
            .state
            .lock()
            .unwrap()
            .controllers
            .get(run_id)
            .cloned();
        if let Some(token) = controller {
            token.cancel();
            return Ok(true);
        }
        Ok(false)
    }

    /// Signal every running run's cancellation handle (graceful shutdown).
    pub fn cancel_all_running(&self) {
        let controllers: Vec<CancellationToken> = self
            .state
            .lock()
            .unwrap()
            .controllers
            .values()
            .cloned()
            .collect();
        for token in controllers {
            token.cancel();
        }
    }

    /// Start as many pending runs as the cap allows. Called after every
    /// enqueue and after every run finishes.
    pub fn tick(self: &Arc<Self>) {
        loop {
            let claimed = match self.claim_next() {
                Ok(claimed) => claimed,
                Err(e) => {
                    tracing::error!("queue tick failed: {e}");
                    return;
                }
            };
            let Some((run, token)) = claimed else { return };
            if let Err(e) = self.db.mark_run_started(&run.id, Utc::now()) {
                tracing::error!("failed to mark run {} started: {e}", run.id);
            }
            self.journal.emit_best_effort(
                &run.thread_id,
                Some(&run.id),
                EventKind::RunStarted,
                &payloads::RunLifecycle::default(),
            );
            tracing::info!("run {} started (thread {})", run.id, run.thread_id);

            let queue = Arc::clone(self);
            tokio::spawn(async move {
                let result = std::panic::AssertUnwindSafe(
                    queue.executor.execute(run.clone(), token.clone()),
                )
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("iteration loop panicked")));

                queue.finalize(&run, result, &token);
                {
                    let mut state = queue.state.lock().unwrap();
                    state.controllers.remove(&run.id);
                    state.running.remove(&run.id);
                    state.running_threads.remove(&run.thread_id);
                }
                queue.tick();
            });
        }
    }

    /// Pop the first pending run that is still `queued` and whose thread has
    /// no running run, marking it running and registering its controller in
    /// the same critical section. Stale entries (no longer queued) are
    /// dropped.
    fn claim_next(&self) -> Result<Option<(Run, CancellationToken)>> {
        let mut state = self.state.lock().unwrap();
        if state.running.len() >= self.max_concurrent {
            return Ok(None);
        }

        let mut index = 0;
        while index < state.pending.len() {
            let run_id = state.pending[index].clone();
            let Some(run) = self.db.get_run(&run_id)? else {
                state.pending.remove(index);
                continue;
            };
            if run.status != RunStatus::Queued {
                state.pending.remove(index);
                continue;
            }
            if state.running_threads.contains(&run.thread_id)
                || self.db.thread_has_running_run(&run.thread_id)?
            {
                // Same-thread run in flight; keep FIFO position and look at
                // the next candidate.
                index += 1;
                continue;
            }
            state.pending.remove(index);
            state.running.insert(run.id.clone());
            state.running_threads.insert(run.thread_id.clone());
            let token = CancellationToken::new();
            state.controllers.insert(run.id.clone(), token.clone());
            return Ok(Some((run, token)));
        }
        Ok(None)
    }

    /// Record the terminal status for a finished executor. A cancelled run is
    /// never marked failed, even when the loop surfaced an error.
    fn finalize(&self, run: &Run, result: anyhow::Result<LoopOutcome>, token: &CancellationToken) {
        let (status, iterations, error) = match &result {
            Ok(outcome) if outcome.success => (RunStatus::Completed, outcome.iterations, None),
            Ok(outcome) if outcome.cancelled => (RunStatus::Cancelled, outcome.iterations, None),
            Ok(outcome) => (
                RunStatus::Failed,
                outcome.iterations,
                Some(EXHAUSTED_ERROR.to_string()),
            ),
            Err(_) if token.is_cancelled() => (RunStatus::Cancelled, 0, None),
            Err(e) => (RunStatus::Failed, 0, Some(e.to_string())),
        };

        if let Err(e) = self.db.mark_run_finished(
            &run.id,
            status,
            iterations,
            error.as_deref(),
            Utc::now(),
        ) {
            tracing::error!("failed to finalize run {}: {e}", run.id);
        }

        match status {
            RunStatus::Completed => {
                tracing::info!("run {} completed after {iterations} iterations", run.id);
                self.journal.emit_best_effort(
                    &run.thread_id,
                    Some(&run.id),
                    EventKind::RunCompleted,
                    &payloads::RunCompleted { iterations },
                );
            }
            RunStatus::Cancelled => {
                tracing::info!("run {} cancelled", run.id);
                self.journal.emit_best_effort(
                    &run.thread_id,
                    Some(&run.id),
                    EventKind::RunCancelled,
                    &payloads::RunLifecycle::default(),
                );
            }
            _ => {
                let message = error.unwrap_or_default();
                tracing::warn!("run {} failed: {message}", run.id);
                self.journal.emit_best_effort(
                    &run.thread_id,
                    Some(&run.id),
                    EventKind::RunFailed,
                    &payloads::RunFailed { message },
                );
            }
        }
    }

    fn emit_lifecycle(&self, run_id: &str, kind: EventKind) -> Result<()> {
        if let Some(run) = self.db.get_run(run_id)? {
            self.journal.emit_best_effort(
                &run.thread_id,
                Some(run_id),
                kind,
                &payloads::RunLifecycle::default(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Broadcaster;
    use crate::storage::threads::test_support::sample_thread;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Executor that records concurrency and completes after a short delay.
    struct StubExecutor {
        delay: Duration,
        outcome: LoopOutcome,
        active: AtomicUsize,
        max_active: AtomicUsize,
        order: Mutex<Vec<String>>,
    }

    impl StubExecutor {
        fn new(delay: Duration, outcome: LoopOutcome) -> Arc<Self> {
            Arc::new(Self {
                delay,
                outcome,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                order: Mutex::new(Vec::new()),
            })
        }

        fn succeeding(delay: Duration) -> Arc<Self> {
            Self::new(
                delay,
                LoopOutcome {
                    success: true,
                    iterations: 1,
                    cancelled: false,
                },
            )
        }
    }

    #[async_trait]
    impl RunExecutor for StubExecutor {
        async fn execute(&self, run: Run, cancel: CancellationToken) -> anyhow::Result<LoopOutcome> {
            self.order.lock().unwrap().push(run.id.clone());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            let outcome = tokio::select! {
                _ = cancel.cancelled() => LoopOutcome { success: false, iterations: 0, cancelled: true },
                _ = tokio::time::sleep(self.delay) => self.outcome,
            };

            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(outcome)
        }
    }

    struct Fixture {
        db: Database,
        queue: Arc<RunQueue>,
    }

    fn fixture(max_concurrent: usize, executor: Arc<StubExecutor>) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let journal = Journal::new(db.clone(), Broadcaster::new());
        let queue = RunQueue::new(
            db.clone(),
            journal,
            executor as Arc<dyn RunExecutor>,
            max_concurrent,
        );
        Fixture { db, queue }
    }

    fn make_run(db: &Database, thread_id: &str) -> Run {
        if db.get_thread(thread_id).unwrap().is_none() {
            db.insert_thread(&sample_thread(thread_id)).unwrap();
        }
        let run = Run::new(thread_id, 3);
        db.insert_run(&run).unwrap();
        run
    }

    async fn wait_for_status(db: &Database, run_id: &str, status: RunStatus) {
        for _ in 0..200 {
            if db.run_status(run_id).unwrap() == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {run_id} never reached {status:?}");
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let executor = StubExecutor::succeeding(Duration::from_millis(50));
        let f = fixture(2, executor.clone());

        let runs: Vec<Run> = (0..5)
            .map(|i| make_run(&f.db, &format!("t{i}")))
            .collect();
        for run in &runs {
            f.queue.enqueue(&run.id);
        }
        for run in &runs {
            wait_for_status(&f.db, &run.id, RunStatus::Completed).await;
        }
        assert!(executor.max_active.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_fifo_with_cap_one() {
        let executor = StubExecutor::succeeding(Duration::from_millis(20));
        let f = fixture(1, executor.clone());

        let r1 = make_run(&f.db, "ta");
        let r2 = make_run(&f.db, "tb");
        let r3 = make_run(&f.db, "tc");
        f.queue.enqueue(&r1.id);
        f.queue.enqueue(&r2.id);
        f.queue.enqueue(&r3.id);

        wait_for_status(&f.db, &r3.id, RunStatus::Completed).await;
        assert_eq!(
            *executor.order.lock().unwrap(),
            vec![r1.id.clone(), r2.id.clone(), r3.id.clone()]
        );
        assert_eq!(executor.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pause_resume_stop_before_start() {
        // A slow run occupies the single slot so the target run stays pending.
        let executor = StubExecutor::succeeding(Duration::from_millis(500));
        let f = fixture(1, executor);

        let blocker = make_run(&f.db, "ta");
        let target = make_run(&f.db, "tb");
        f.queue.enqueue(&blocker.id);
        wait_for_status(&f.db, &blocker.id, RunStatus::Running).await;
        f.queue.enqueue(&target.id);

        assert!(f.queue.pause(&target.id).unwrap());
        assert_eq!(
            f.db.run_status(&target.id).unwrap(),
            Some(RunStatus::Paused)
        );

        // Pausing again is a no-op: the run is no longer pending.
        assert!(!f.queue.pause(&target.id).unwrap());

        assert!(f.queue.resume(&target.id).unwrap());
        assert_eq!(
            f.db.run_status(&target.id).unwrap(),
            Some(RunStatus::Queued)
        );

        assert!(f.queue.stop(&target.id).unwrap());
        let stopped = f.db.get_run(&target.id).unwrap().unwrap();
        assert_eq!(stopped.status, RunStatus::Cancelled);
        assert!(stopped.finished_at.is_some());

        let kinds: Vec<EventKind> = f
            .db
            .events_for_thread("tb", 50)
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert!(kinds.contains(&EventKind::RunPaused));
        assert!(kinds.contains(&EventKind::RunResumed));
        assert!(kinds.contains(&EventKind::RunCancelled));
        // The stopped run never started.
        assert!(!kinds.contains(&EventKind::RunStarted));
    }

    #[tokio::test]
    async fn test_pause_running_run_is_rejected() {
        let executor = StubExecutor::succeeding(Duration::from_millis(300));
        let f = fixture(1, executor);

        let run = make_run(&f.db, "ta");
        f.queue.enqueue(&run.id);
        wait_for_status(&f.db, &run.id, RunStatus::Running).await;

        assert!(!f.queue.pause(&run.id).unwrap());
        // No run.paused event was emitted.
        let kinds: Vec<EventKind> = f
            .db
            .events_for_thread("ta", 50)
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert!(!kinds.contains(&EventKind::RunPaused));
    }

    #[tokio::test]
    async fn test_stop_running_run_cancels() {
        let executor = StubExecutor::succeeding(Duration::from_secs(30));
        let f = fixture(1, executor);

        let run = make_run(&f.db, "ta");
        f.queue.enqueue(&run.id);
        wait_for_status(&f.db, &run.id, RunStatus::Running).await;

        assert!(f.queue.stop(&run.id).unwrap());
        wait_for_status(&f.db, &run.id, RunStatus::Cancelled).await;
        let finished = f.db.get_run(&run.id).unwrap().unwrap();
        assert!(finished.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_stop_terminal_run_is_noop() {
        let executor = StubExecutor::succeeding(Duration::from_millis(10));
        let f = fixture(1, executor);

        let run = make_run(&f.db, "ta");
        f.queue.enqueue(&run.id);
        wait_for_status(&f.db, &run.id, RunStatus::Completed).await;
        assert!(!f.queue.stop(&run.id).unwrap());
    }

    #[tokio::test]
    async fn test_exhausted_run_is_failed_with_message() {
        let executor = StubExecutor::new(
            Duration::from_millis(10),
            LoopOutcome {
                success: false,
                iterations: 3,
                cancelled: false,
            },
        );
        let f = fixture(1, executor);

        let run = make_run(&f.db, "ta");
        f.queue.enqueue(&run.id);
        wait_for_status(&f.db, &run.id, RunStatus::Failed).await;

        let failed = f.db.get_run(&run.id).unwrap().unwrap();
        assert_eq!(failed.error.as_deref(), Some(EXHAUSTED_ERROR));
        assert_eq!(failed.iterations, 3);

        let failed_events: Vec<_> = f
            .db
            .events_for_thread("ta", 50)
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EventKind::RunFailed)
            .collect();
        assert_eq!(failed_events.len(), 1);
        assert_eq!(failed_events[0].payload["message"], EXHAUSTED_ERROR);
    }

    #[tokio::test]
    async fn test_same_thread_runs_are_serialized() {
        let executor = StubExecutor::succeeding(Duration::from_millis(50));
        let f = fixture(2, executor.clone());

        let r1 = make_run(&f.db, "ta");
        let r2 = make_run(&f.db, "ta");
        f.queue.enqueue(&r1.id);
        f.queue.enqueue(&r2.id);

        wait_for_status(&f.db, &r2.id, RunStatus::Completed).await;
        // Despite cap 2, the shared thread forces one at a time.
        assert_eq!(executor.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(
            *executor.order.lock().unwrap(),
            vec![r1.id.clone(), r2.id.clone()]
        );
    }
}
