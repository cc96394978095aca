//! Expectation-based mock process runner for tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::runner::{CommandResult, ProcessCommand, ProcessRunner};

type ArgsMatcher = Box<dyn Fn(&[String]) -> bool + Send + Sync>;

struct Expectation {
    program: String,
    args_matcher: Option<ArgsMatcher>,
    result: CommandResult,
    /// Consume this expectation after one match instead of reusing it.
    once: bool,
    used: bool,
}

#[derive(Clone)]
pub struct MockProcessRunner {
    expectations: Arc<Mutex<Vec<Expectation>>>,
    call_history: Arc<Mutex<Vec<ProcessCommand>>>,
}

impl MockProcessRunner {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(Vec::new())),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn expect(&mut self, program: &str) -> ExpectationBuilder<'_> {
        ExpectationBuilder {
            runner: self,
            expectation: Expectation {
                program: program.to_string(),
                args_matcher: None,
                result: CommandResult {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: 0,
                    elapsed_ms: 5,
                },
                once: false,
                used: false,
            },
        }
    }

    pub fn calls(&self) -> Vec<ProcessCommand> {
        self.call_history.lock().unwrap().clone()
    }

    pub fn call_count(&self, program: &str) -> usize {
        self.call_history
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.program == program)
            .count()
    }
}

impl Default for MockProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ExpectationBuilder<'a> {
    runner: &'a mut MockProcessRunner,
    expectation: Expectation,
}

impl ExpectationBuilder<'_> {
    pub fn with_args(mut self, matcher: impl Fn(&[String]) -> bool + Send + Sync + 'static) -> Self {
        self.expectation.args_matcher = Some(Box::new(matcher));
        self
    }

    pub fn returns_stdout(mut self, stdout: &str) -> Self {
        self.expectation.result.stdout = stdout.to_string();
        self
    }

    pub fn returns_stderr(mut self, stderr: &str) -> Self {
        self.expectation.result.stderr = stderr.to_string();
        self
    }

    pub fn returns_exit_code(self, code: i32) {
        let mut expectation = self.expectation;
        expectation.result.exit_code = code;
        self.runner.expectations.lock().unwrap().push(expectation);
    }

    pub fn returns_success(self) {
        self.returns_exit_code(0)
    }

    /// Register a single-use expectation; later matching calls fall through
    /// to expectations registered after this one.
    pub fn once(mut self) -> Self {
        self.expectation.once = true;
        self
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, command: ProcessCommand) -> CommandResult {
        self.call_history.lock().unwrap().push(command.clone());

        let mut expectations = self.expectations.lock().unwrap();
        for expectation in expectations.iter_mut() {
            if expectation.program != command.program || expectation.used {
                continue;
            }
            if let Some(matcher) = &expectation.args_matcher {
                if !matcher(&command.args) {
                    continue;
                }
            }
            if expectation.once {
                expectation.used = true;
            }
            return expectation.result.clone();
        }

        // Unmatched commands behave like a spawn failure so tests surface
        // missing expectations through the normal scoring path.
        CommandResult::spawn_failure(
            format!(
                "no mock expectation for: {} {}",
                command.program,
                command.args.join(" ")
            ),
            1,
        )
    }
}
