//! Codex CLI adapter.
//!
//! Codex runs non-interactively as `codex exec [OPTIONS] PROMPT`. The sandbox
//! mode defaults to `workspace-write` so the agent can edit the worktree but
//! nothing outside it.

use std::path::Path;

use super::{AgentAdapter, SpawnConfig};

#[derive(Debug)]
pub struct CodexAdapter {
    model: Option<String>,
    sandbox: Option<String>,
    additional_flags: Vec<String>,
}

impl CodexAdapter {
    pub fn new(model: Option<String>, sandbox: Option<String>, additional_flags: Vec<String>) -> Self {
        Self {
            model,
            sandbox,
            additional_flags,
        }
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new(None, None, Vec::new())
    }
}

impl AgentAdapter for CodexAdapter {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn display_name(&self) -> &'static str {
        "Codex"
    }

    fn binary(&self) -> &'static str {
        "codex"
    }

    fn build_command(&self, prompt: &str, cwd: &Path) -> SpawnConfig {
        let mut args = vec!["exec".to_string(), "--full-auto".to_string()];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.push("--sandbox".to_string());
        args.push(
            self.sandbox
                .clone()
                .unwrap_or_else(|| "workspace-write".to_string()),
        );
        args.extend(self.additional_flags.iter().cloned());
        args.push(prompt.to_string());

        SpawnConfig {
            program: self.binary().to_string(),
            args,
            cwd: cwd.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_argv() {
        let spawn = CodexAdapter::default().build_command("write docs", Path::new("/w"));
        assert_eq!(spawn.program, "codex");
        assert_eq!(
            spawn.args,
            vec![
                "exec",
                "--full-auto",
                "--sandbox",
                "workspace-write",
                "write docs"
            ]
        );
    }

    #[test]
    fn test_sandbox_override() {
        let adapter = CodexAdapter::new(None, Some("danger-full-access".into()), vec![]);
        let spawn = adapter.build_command("p", Path::new("/w"));
        assert!(spawn.args.contains(&"danger-full-access".to_string()));
    }
}
