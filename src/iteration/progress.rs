//! The progress document: the agent's only durable memory between
//! iterations. It lives inside the worktree and is read before every
//! iteration; the agent is instructed to update it.

use std::path::Path;

use crate::error::Result;

/// Create the progress file with its initial structure if it does not exist
/// yet. Returns true when the file was created.
pub fn init_if_missing(worktree: &Path, progress_file: &str, task: &str) -> Result<bool> {
    let path = worktree.join(progress_file);
    if path.exists() {
        return Ok(false);
    }
    let content = format!(
        "# Ralph Loop Progress\n\n## Task\n{task}\n\n## Status\nStarted — no iterations completed yet.\n\n## Iteration Log\n"
    );
    std::fs::write(&path, content)?;
    Ok(true)
}

/// Read the current progress document. Returns the content and whether the
/// file exists.
pub fn read(worktree: &Path, progress_file: &str) -> (String, bool) {
    match std::fs::read_to_string(worktree.join(progress_file)) {
        Ok(content) => (content, true),
        Err(_) => (String::new(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_template_once() {
        let dir = TempDir::new().unwrap();
        let created = init_if_missing(dir.path(), "ralph-progress-t1.md", "fix it").unwrap();
        assert!(created);

        let (content, exists) = read(dir.path(), "ralph-progress-t1.md");
        assert!(exists);
        assert!(content.starts_with("# Ralph Loop Progress"));
        assert!(content.contains("## Task\nfix it"));
        assert!(content.contains("## Status"));
        assert!(content.ends_with("## Iteration Log\n"));

        // Existing content is never clobbered.
        std::fs::write(dir.path().join("ralph-progress-t1.md"), "edited").unwrap();
        let created = init_if_missing(dir.path(), "ralph-progress-t1.md", "fix it").unwrap();
        assert!(!created);
        assert_eq!(read(dir.path(), "ralph-progress-t1.md").0, "edited");
    }

    #[test]
    fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let (content, exists) = read(dir.path(), "ralph-progress-x.md");
        assert!(!exists);
        assert!(content.is_empty());
    }
}
