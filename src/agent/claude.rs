//! Claude Code CLI adapter.
//!
//! Non-interactive invocation is `claude -p <prompt>` with permission checks
//! disabled; the loop supervises the workspace, not the user.

use std::path::Path;

use super::{AgentAdapter, SpawnConfig};

#[derive(Debug)]
pub struct ClaudeAdapter {
    model: Option<String>,
    max_turns: Option<u32>,
    additional_flags: Vec<String>,
}

impl ClaudeAdapter {
    pub fn new(model: Option<String>, max_turns: Option<u32>, additional_flags: Vec<String>) -> Self {
        Self {
            model,
            max_turns,
            additional_flags,
        }
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new(None, None, Vec::new())
    }
}

impl AgentAdapter for ClaudeAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn display_name(&self) -> &'static str {
        "Claude Code"
    }

    fn binary(&self) -> &'static str {
        "claude"
    }

    fn build_command(&self, prompt: &str, cwd: &Path) -> SpawnConfig {
        let mut args = vec![
            "-p".to_string(),
            "--dangerously-skip-permissions".to_string(),
        ];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(max_turns) = self.max_turns {
            args.push("--max-turns".to_string());
            args.push(max_turns.to_string());
        }
        args.extend(self.additional_flags.iter().cloned());
        args.push(prompt.to_string());

        SpawnConfig {
            program: self.binary().to_string(),
            args,
            cwd: cwd.to_path_buf(),
        }
    }
}
