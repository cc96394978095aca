//! Prompt assembly.
//!
//! A pure function from a context record to the agent's input text. Equal
//! contexts produce byte-identical prompts; nothing here reads the clock,
//! the filesystem, or randomness.

use serde::{Deserialize, Serialize};

/// Context carried when a run executes one task of a larger product
/// requirements document. PRD parsing itself lives outside this system; the
/// loop only threads the already-extracted fields through to the prompt and
/// the checkpoint commit messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrdContext {
    pub task_id: String,
    pub task_index: usize,
    pub task_total: usize,
    pub project_name: String,
    pub project_description: String,
    pub acceptance_criteria: Vec<String>,
    pub completed_summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub task: &'a str,
    pub iteration: u32,
    pub max_iterations: u32,
    pub progress_content: &'a str,
    pub progress_exists: bool,
    pub progress_file: &'a str,
    pub validation_commands: &'a [String],
    pub completion_secret: &'a str,
    pub last_failure_output: Option<&'a str>,
    pub was_reverted: bool,
    pub prd: Option<&'a PrdContext>,
}

/// Assemble the full prompt. Section order is fixed: task, PRD header,
/// rules, prior progress, revert warning, prior failures, completion
/// instruction.
pub fn build_prompt(ctx: &PromptContext<'_>) -> String {
    let mut out = String::new();

    out.push_str("# Task\n\n");
    out.push_str(ctx.task);
    out.push_str("\n\n");

    if let Some(prd) = ctx.prd {
        out.push_str(&format!(
            "# Project: {} (task {} of {})\n\n{}\n\n",
            prd.project_name, prd.task_index, prd.task_total, prd.project_description
        ));
        if !prd.acceptance_criteria.is_empty() {
            out.push_str("Acceptance criteria:\n");
            for criterion in &prd.acceptance_criteria {
                out.push_str(&format!("- {criterion}\n"));
            }
            out.push('\n');
        }
        if let Some(summary) = &prd.completed_summary {
            out.push_str("Previously completed tasks:\n");
            out.push_str(summary);
            out.push_str("\n\n");
        }
    }

    out.push_str("# Rules\n\n");
    out.push_str(&format!(
        "- This is iteration {} of {}.\n",
        ctx.iteration, ctx.max_iterations
    ));
    out.push_str(&format!(
        "- Record what you did and what remains in `{}`; it is your only memory between iterations.\n",
        ctx.progress_file
    ));
    out.push_str("- Your work is checked by running these commands; all must exit 0:\n");
    for (i, command) in ctx.validation_commands.iter().enumerate() {
        out.push_str(&format!("  {}. `{}`\n", i + 1, command));
    }
    out.push('\n');

    if ctx.progress_exists {
        out.push_str("# Progress so far\n\n");
        out.push_str(ctx.progress_content);
        out.push_str("\n\n");
    } else {
        out.push_str("# Progress so far\n\nThis is the first iteration; no progress has been recorded yet.\n\n");
    }

    if ctx.was_reverted {
        out.push_str(
            "# Warning\n\nYour previous iteration made validation results worse and was reverted. \
             The workspace is back at the last good state; take a different approach.\n\n",
        );
    }

    if let Some(failures) = ctx.last_failure_output {
        if !failures.is_empty() {
            out.push_str("# Failing validations from the last iteration\n\n");
            out.push_str(failures);
            out.push('\n');
        }
    }

    out.push_str(&format!(
        "# Completing\n\nWhen every validation command passes and the task is done, print this \
         token as the final line of your output, by itself:\n\n{}\n",
        ctx.completion_secret
    ));

    out
}
