//! Agent adapters: each supported coding-agent CLI is a small translation
//! from a prompt + working directory into a concrete argv.
//!
//! The registry is the only place adapter names are resolved; an unknown name
//! is an [`AgentNotFound`](crate::error::RalphError::AgentNotFound) error.

pub mod claude;
pub mod codex;
pub mod opencode;

pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use opencode::OpencodeAdapter;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{RalphError, Result};
use crate::subprocess::{ProcessCommandBuilder, SubprocessManager};

/// Everything needed to spawn one agent invocation.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// Per-adapter option records, selected by agent name.
///
/// Every variant recognizes `model` and `additionalFlags`; the rest is
/// specific to what the underlying CLI accepts. At runtime these come from
/// `RALPH_AGENT_OPTIONS` (a JSON array tagged by agent name) via
/// [`Config`](crate::config::Config) and are applied to the registry the
/// control plane is built with.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "agent", rename_all = "lowercase")]
pub enum AgentOptions {
    #[serde(rename_all = "camelCase")]
    Claude {
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        max_turns: Option<u32>,
        #[serde(default)]
        additional_flags: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Codex {
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        sandbox: Option<String>,
        #[serde(default)]
        additional_flags: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Opencode {
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        additional_flags: Vec<String>,
    },
}

pub trait AgentAdapter: Send + Sync + std::fmt::Debug {
    /// Registry key, e.g. `"claude"`.
    fn name(&self) -> &'static str;

    /// Human-readable name for listings.
    fn display_name(&self) -> &'static str;

    /// The CLI binary probed by the installed check.
    fn binary(&self) -> &'static str;

    /// Translate a prompt and workspace directory into a concrete argv.
    /// The prompt is always the final positional argument.
    fn build_command(&self, prompt: &str, cwd: &Path) -> SpawnConfig;
}

#[derive(Clone)]
pub struct AgentRegistry {
    adapters: HashMap<&'static str, Arc<dyn AgentAdapter>>,
}

impl AgentRegistry {
    /// Registry with the three stock adapters on default options.
    pub fn new() -> Self {
        Self::with_options(Vec::new())
    }

    /// Registry with the stock adapters, applying any supplied option
    /// records over the defaults (last record per agent wins).
    pub fn with_options(options: Vec<AgentOptions>) -> Self {
        let mut claude = ClaudeAdapter::default();
        let mut codex = CodexAdapter::default();
        let mut opencode = OpencodeAdapter::default();

        for option in options {
            match option {
                AgentOptions::Claude {
                    model,
                    max_turns,
                    additional_flags,
                } => claude = ClaudeAdapter::new(model, max_turns, additional_flags),
                AgentOptions::Codex {
                    model,
                    sandbox,
                    additional_flags,
                } => codex = CodexAdapter::new(model, sandbox, additional_flags),
                AgentOptions::Opencode {
                    model,
                    additional_flags,
                } => opencode = OpencodeAdapter::new(model, additional_flags),
            }
        }

        let mut adapters: HashMap<&'static str, Arc<dyn AgentAdapter>> = HashMap::new();
        adapters.insert("claude", Arc::new(claude));
        adapters.insert("codex", Arc::new(codex));
        adapters.insert("opencode", Arc::new(opencode));
        Self { adapters }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn AgentAdapter>> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| RalphError::AgentNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.adapters.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Probe whether the adapter's CLI is installed by invoking it with
    /// `--version`.
    pub async fn is_installed(&self, name: &str, subprocess: &SubprocessManager) -> Result<bool> {
        let adapter = self.get(name)?;
        let result = subprocess
            .runner()
            .run(
                ProcessCommandBuilder::new(adapter.binary())
                    .arg("--version")
                    .build(),
            )
            .await;
        Ok(result.success())
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::MockProcessRunner;

    #[test]
    fn test_stock_adapters_registered() {
        let registry = AgentRegistry::new();
        assert_eq!(registry.names(), vec!["claude", "codex", "opencode"]);
        assert!(registry.get("claude").is_ok());
        assert!(registry.get("codex").is_ok());
        assert!(registry.get("opencode").is_ok());
    }

    #[test]
    fn test_unknown_agent_errors() {
        let registry = AgentRegistry::new();
        let err = registry.get("gemini").unwrap_err();
        assert!(matches!(err, RalphError::AgentNotFound(name) if name == "gemini"));
    }

    #[test]
    fn test_prompt_is_final_positional_for_every_adapter() {
        let registry = AgentRegistry::new();
        let cwd = Path::new("/work");
        for name in registry.names() {
            let adapter = registry.get(name).unwrap();
            let spawn = adapter.build_command("do the thing", cwd);
            assert_eq!(
                spawn.args.last().map(String::as_str),
                Some("do the thing"),
                "adapter {name} must put the prompt last"
            );
            assert_eq!(spawn.cwd, cwd);
        }
    }

    #[test]
    fn test_options_deserialize_tagged_by_agent() {
        let options: Vec<AgentOptions> = serde_json::from_str(
            r#"[{"agent":"codex","model":"o3","additionalFlags":["--json"]},{"agent":"claude","maxTurns":40}]"#,
        )
        .unwrap();
        assert!(matches!(
            &options[0],
            AgentOptions::Codex { model: Some(m), .. } if m == "o3"
        ));
        assert!(matches!(
            &options[1],
            AgentOptions::Claude { max_turns: Some(40), .. }
        ));
    }

    #[test]
    fn test_options_override_defaults() {
        let registry = AgentRegistry::with_options(vec![AgentOptions::Claude {
            model: Some("opus".to_string()),
            max_turns: Some(40),
            additional_flags: vec!["--verbose".to_string()],
        }]);
        let spawn = registry
            .get("claude")
            .unwrap()
            .build_command("task", Path::new("/w"));
        let joined = spawn.args.join(" ");
        assert!(joined.contains("--model opus"));
        assert!(joined.contains("--max-turns 40"));
        assert!(joined.contains("--verbose"));
    }

    #[tokio::test]
    async fn test_installed_check_runs_version() {
        let mut mock = MockProcessRunner::new();
        mock.expect("claude")
            .with_args(|args| args == ["--version"])
            .returns_stdout("1.0.0");
        let subprocess = SubprocessManager::new(std::sync::Arc::new(mock));

        let registry = AgentRegistry::new();
        assert!(registry.is_installed("claude", &subprocess).await.unwrap());
        // codex has no expectation configured, so the probe fails
        assert!(!registry.is_installed("codex", &subprocess).await.unwrap());
    }
}
