//! End-to-end: a real git repository, real shell validation, and a fake
//! `claude` CLI on PATH that extracts the completion secret from its prompt.
//!
//! Both scenarios share one process-wide PATH override, so they live in a
//! single test function.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use ralph::config::Config;
use ralph::control::ControlPlane;
use ralph::events::EventKind;
use ralph::queue::EXHAUSTED_ERROR;
use ralph::storage::RunStatus;
use tempfile::TempDir;

fn git(repo: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(repo)
        .status()
        .expect("git must be available for this test");
    assert!(status.success(), "git {args:?} failed");
}

fn init_repo(repo: &Path) {
    git(repo, &["init", "--initial-branch=main"]);
    git(repo, &["config", "user.email", "ralph@example.com"]);
    git(repo, &["config", "user.name", "ralph"]);
    std::fs::write(repo.join("README.md"), "# fixture\n").unwrap();
    git(repo, &["add", "-A"]);
    git(repo, &["commit", "-m", "initial"]);
}

/// Install a fake `claude` binary that answers the version probe, touches
/// `done.txt` in its working directory, and echoes back any completion
/// secret it finds in the prompt (the final argument).
fn install_fake_agent(bin_dir: &Path) {
    let script = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
    echo "fake-claude 1.0.0"
    exit 0
fi
for last; do :; done
echo done > done.txt
printf '%s\n' "$last" | grep -o 'RALPH_COMPLETE_[0-9a-f]\{8\}' | head -1
"#;
    let path = bin_dir.join("claude");
    std::fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

async fn wait_for_terminal(control: &ControlPlane, run_id: &str) -> RunStatus {
    for _ in 0..600 {
        let status = control.db.run_status(run_id).unwrap().unwrap();
        if status.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("run {run_id} never finished");
}

fn worktree_head_subject(worktree: &str) -> String {
    let output = Command::new("git")
        .args(["log", "-1", "--format=%s"])
        .current_dir(worktree)
        .output()
        .unwrap();
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[tokio::test]
async fn test_full_loop_against_real_repo() {
    let bin_dir = TempDir::new().unwrap();
    install_fake_agent(bin_dir.path());
    let old_path = std::env::var("PATH").unwrap_or_default();
    std::env::set_var(
        "PATH",
        format!("{}:{}", bin_dir.path().display(), old_path),
    );

    let repo = TempDir::new().unwrap();
    init_repo(repo.path());

    let state_dir = TempDir::new().unwrap();
    let config = Config {
        db_path: state_dir.path().join("ralph.db"),
        max_iterations: 2,
        ..Config::default()
    };
    let control = ControlPlane::new(config).unwrap();

    // Scenario A: the agent creates done.txt and echoes the secret, so the
    // first iteration completes the run with a checkpoint commit.
    let thread = control
        .create_thread(
            "happy",
            "create done.txt",
            &repo.path().to_string_lossy(),
            Some("claude".into()),
            Some(vec!["test -f done.txt".into()]),
        )
        .await
        .unwrap();

    let run = control.create_run(&thread.id, Some(2), None, None).unwrap();
    assert_eq!(wait_for_terminal(&control, &run.id).await, RunStatus::Completed);

    let finished = control.get_run(&run.id).unwrap();
    assert_eq!(finished.iterations, 1);
    assert!(finished.started_at.is_some());
    assert!(finished.finished_at.is_some());

    let mut kinds: Vec<EventKind> = control
        .db
        .events_for_thread(&thread.id, 100)
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    kinds.reverse(); // oldest first
    let position = |kind: EventKind| kinds.iter().position(|k| *k == kind).unwrap();
    assert!(position(EventKind::RunQueued) < position(EventKind::RunStarted));
    assert!(position(EventKind::RunStarted) < position(EventKind::LoopIterationStarted));
    assert!(position(EventKind::LoopIterationStarted) < position(EventKind::LoopAgentSpawned));
    assert!(position(EventKind::LoopAgentSpawned) < position(EventKind::LoopAgentExited));
    assert!(position(EventKind::LoopAgentExited) < position(EventKind::LoopValidationCompleted));
    assert!(position(EventKind::LoopValidationCompleted) < position(EventKind::RunCompleted));
    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::LoopIterationStarted).count(),
        1
    );

    assert_eq!(
        worktree_head_subject(&thread.worktree_path),
        "ralph: task complete (iteration 1)"
    );

    // The progress document was initialized inside the worktree.
    let progress = std::fs::read_to_string(
        Path::new(&thread.worktree_path).join(format!("ralph-progress-{}.md", thread.id)),
    )
    .unwrap();
    assert!(progress.starts_with("# Ralph Loop Progress"));

    // The diff surface works against the real worktree (clean after commit).
    let diff = control.thread_diff(&thread.id).await.unwrap();
    assert!(diff.is_empty());

    // Scenario B: the validation can never pass, so the run exhausts its
    // budget and fails with the canonical error.
    let doomed = control
        .create_thread(
            "doomed",
            "an impossible task",
            &repo.path().to_string_lossy(),
            Some("claude".into()),
            Some(vec!["test -f never-created.txt".into()]),
        )
        .await
        .unwrap();

    let run = control.create_run(&doomed.id, Some(2), None, None).unwrap();
    assert_eq!(wait_for_terminal(&control, &run.id).await, RunStatus::Failed);

    let failed = control.get_run(&run.id).unwrap();
    assert_eq!(failed.iterations, 2);
    assert_eq!(failed.error.as_deref(), Some(EXHAUSTED_ERROR));

    let kinds: Vec<EventKind> = control
        .db
        .events_for_thread(&doomed.id, 100)
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::LoopIterationStarted).count(),
        2
    );
    assert!(kinds.contains(&EventKind::RunFailed));
    assert!(!kinds.contains(&EventKind::RunCompleted));
}
