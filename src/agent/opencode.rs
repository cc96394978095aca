//! opencode CLI adapter: `opencode run [OPTIONS] PROMPT`.

use std::path::Path;

use super::{AgentAdapter, SpawnConfig};

#[derive(Debug)]
pub struct OpencodeAdapter {
    model: Option<String>,
    additional_flags: Vec<String>,
}

impl OpencodeAdapter {
    pub fn new(model: Option<String>, additional_flags: Vec<String>) -> Self {
        Self {
            model,
            additional_flags,
        }
    }
}

impl Default for OpencodeAdapter {
    fn default() -> Self {
        Self::new(None, Vec::new())
    }
}

impl AgentAdapter for OpencodeAdapter {
    fn name(&self) -> &'static str {
        "opencode"
    }

    fn display_name(&self) -> &'static str {
        "opencode"
    }

    fn binary(&self) -> &'static str {
        "opencode"
    }

    fn build_command(&self, prompt: &str, cwd: &Path) -> SpawnConfig {
        let mut args = vec!["run".to_string()];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_argv() {
        let spawn = OpencodeAdapter::default().build_command("refactor", Path::new("/w"));
        assert_eq!(spawn.program, "opencode");
        assert_eq!(spawn.args, vec!["run", "refactor"]);
    }
}
