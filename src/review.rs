//! Folding review feedback into a rerun's task override.

use crate::storage::ReviewComment;

pub const FEEDBACK_HEADER: &str = "Address the following review feedback before declaring completion:";

/// Build the task override for a feedback rerun: the thread's base task, a
/// blank line, the feedback header, and one numbered line per comment in
/// submission order.
pub fn build_feedback_task(base_task: &str, comments: &[ReviewComment]) -> String {
    let mut out = String::with_capacity(base_task.len() + 64 * comments.len());
    out.push_str(base_task);
    out.push_str("\n\n");
    out.push_str(FEEDBACK_HEADER);
    out.push('\n');
    for (index, comment) in comments.iter().enumerate() {
        out.push_str(&format!(
            "{}. {}:{} - {}\n",
            index + 1,
            comment.file_path,
            comment.line_number,
            comment.body
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(file: &str, line: u32, body: &str) -> ReviewComment {
        ReviewComment::new("t1", None, file.to_string(), line, body.to_string())
    }

    #[test]
    fn test_folding_preserves_submission_order() {
        let comments = vec![
            comment("src/a.ts", 10, "rename"),
            comment("src/a.ts", 22, "extract helper"),
        ];
        let task = build_feedback_task("Build the widget", &comments);

        assert!(task.starts_with("Build the widget\n\n"));
        assert!(task.contains(FEEDBACK_HEADER));
        let first = task.find("1. src/a.ts:10 - rename").unwrap();
        let second = task.find("2. src/a.ts:22 - extract helper").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_order_follows_selection_not_location() {
        let comments = vec![
            comment("src/z.rs", 99, "later file first"),
            comment("src/a.rs", 1, "earlier file second"),
        ];
        let task = build_feedback_task("task", &comments);
        assert!(task.contains("1. src/z.rs:99 - later file first"));
        assert!(task.contains("2. src/a.rs:1 - earlier file second"));
    }
}
