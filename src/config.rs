//! Environment-backed configuration.
//!
//! Everything has a default so `ralph serve` works out of the box; the
//! control plane receives one `Config` value at startup and passes it by
//! reference, never reading the environment again.

use std::path::PathBuf;
use std::time::Duration;

use crate::agent::AgentOptions;

#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the embedded database file.
    pub db_path: PathBuf,
    /// Bind host for the HTTP/WS control surface.
    pub host: String,
    /// Bind port for the HTTP/WS control surface.
    pub port: u16,
    /// Maximum number of runs executing at once.
    pub max_concurrent: usize,
    /// Default iteration budget for new runs.
    pub max_iterations: u32,
    /// Timeout applied to each agent invocation.
    pub agent_timeout: Duration,
    /// Optional timeout applied to each validation command.
    pub validate_timeout: Option<Duration>,
    /// Character cap for the failure context fed back into the next prompt.
    pub failure_context_max_chars: usize,
    /// Sleep between iterations, zero to disable.
    pub iteration_delay: Duration,
    /// Whether the loop commits checkpoints and reverts regressions.
    pub git_checkpoint: bool,
    /// Per-adapter option records applied to the agent registry, from
    /// `RALPH_AGENT_OPTIONS` (a JSON array tagged by agent name, e.g.
    /// `[{"agent":"claude","model":"opus","maxTurns":40}]`).
    pub agent_options: Vec<AgentOptions>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            db_path: env_var("RALPH_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ralph.db")),
            host: env_var("RALPH_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_env("RALPH_PORT").unwrap_or(4242),
            max_concurrent: parse_env("RALPH_MAX_CONCURRENT").unwrap_or(2),
            max_iterations: parse_env("RALPH_MAX_ITERATIONS").unwrap_or(10),
            agent_timeout: Duration::from_secs(parse_env("RALPH_AGENT_TIMEOUT_SECS").unwrap_or(300)),
            validate_timeout: parse_env("RALPH_VALIDATE_TIMEOUT_SECS").map(Duration::from_secs),
            failure_context_max_chars: parse_env("RALPH_FAILURE_CONTEXT_MAX_CHARS").unwrap_or(5000),
            iteration_delay: Duration::from_secs(
                parse_env("RALPH_ITERATION_DELAY_SECS").unwrap_or(0),
            ),
            git_checkpoint: parse_env::<u8>("RALPH_GIT_CHECKPOINT").map(|v| v != 0).unwrap_or(true),
            agent_options: parse_agent_options(env_var("RALPH_AGENT_OPTIONS").as_deref()),
        }
    }

    /// Name of the per-thread progress document inside the worktree.
    pub fn progress_file(thread_id: &str) -> String {
        format!("ralph-progress-{thread_id}.md")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("ralph.db"),
            host: "127.0.0.1".to_string(),
            port: 4242,
            max_concurrent: 2,
            max_iterations: 10,
            agent_timeout: Duration::from_secs(300),
            validate_timeout: None,
            failure_context_max_chars: 5000,
            iteration_delay: Duration::ZERO,
            git_checkpoint: true,
            agent_options: Vec::new(),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_var(key).and_then(|v| v.parse().ok())
}

fn parse_agent_options(raw: Option<&str>) -> Vec<AgentOptions> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_str(raw) {
        Ok(options) => options,
        Err(e) => {
            tracing::warn!("ignoring unparseable RALPH_AGENT_OPTIONS: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 4242);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.agent_timeout, Duration::from_secs(300));
        assert!(config.validate_timeout.is_none());
        assert!(config.git_checkpoint);
    }

    #[test]
    fn test_progress_file_name() {
        assert_eq!(
            Config::progress_file("abc123"),
            "ralph-progress-abc123.md"
        );
    }

    #[test]
    fn test_agent_options_parsing() {
        let options = parse_agent_options(Some(
            r#"[{"agent":"claude","model":"opus","maxTurns":40},{"agent":"codex","sandbox":"danger-full-access"}]"#,
        ));
        assert_eq!(options.len(), 2);
        assert!(matches!(
            &options[0],
            AgentOptions::Claude { model: Some(m), max_turns: Some(40), .. } if m == "opus"
        ));
        assert!(matches!(
            &options[1],
            AgentOptions::Codex { sandbox: Some(s), .. } if s == "danger-full-access"
        ));
    }

    #[test]
    fn test_bad_agent_options_are_ignored() {
        assert!(parse_agent_options(Some("not json")).is_empty());
        assert!(parse_agent_options(Some("{}")).is_empty());
        assert!(parse_agent_options(None).is_empty());
    }
}
