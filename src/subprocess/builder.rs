use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::runner::ProcessCommand;

pub struct ProcessCommandBuilder {
    command: ProcessCommand,
}

impl ProcessCommandBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            command: ProcessCommand {
                program: program.to_string(),
                args: Vec::new(),
                env: HashMap::new(),
                working_dir: None,
                timeout: None,
                cancel: None,
            },
        }
    }

    /// Run a command line through the shell. Only validation commands go
    /// through here; agent and VCS argv are always built explicitly.
    pub fn shell(command_line: &str) -> Self {
        Self::new("sh").args(["-c", command_line])
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.command.args.push(arg.to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.command
            .args
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.command.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.command.working_dir = Some(dir.to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.command.timeout = Some(timeout);
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.command.cancel = Some(token);
        self
    }

    pub fn build(self) -> ProcessCommand {
        self.command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_builds_sh_dash_c() {
        let cmd = ProcessCommandBuilder::shell("cargo test && cargo clippy").build();
        assert_eq!(cmd.program, "sh");
        assert_eq!(cmd.args, vec!["-c", "cargo test && cargo clippy"]);
    }

    #[test]
    fn test_explicit_argv_has_no_shell() {
        let cmd = ProcessCommandBuilder::new("git")
            .args(["commit", "-m", "a message; with $(dangerous) bits"])
            .build();
        assert_eq!(cmd.program, "git");
        // The message stays a single argument, never interpolated.
        assert_eq!(cmd.args[2], "a message; with $(dangerous) bits");
    }
}
