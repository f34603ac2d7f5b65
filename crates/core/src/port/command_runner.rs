// Command Runner Port
// Single "run and capture" capability behind every git/compose/sops/shoutrrr call

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Placeholder substituted for secrets when a command line is displayed
pub const REDACTED: &str = "***";

/// External command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Overrides layered on top of the inherited environment
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    secrets: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout: None,
            secrets: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark a value that must never show up in logs or error messages
    pub fn secret(mut self, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.secrets.push(value);
        }
        self
    }

    /// Raw command line (program and args joined by spaces)
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Command line safe to log
    pub fn display_line(&self) -> String {
        self.redact(&self.command_line())
    }

    /// Replace every registered secret in `text`
    pub fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret, REDACTED))
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// None when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Process timeout after {0}ms")]
    Timeout(i64),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Command Runner trait
///
/// Implementations must not block the async runtime; a non-zero exit status
/// is reported through `CommandOutput`, not as an error.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output
    ///
    /// # Errors
    /// - ExecutionError::SpawnFailed if the program cannot be started
    /// - ExecutionError::Timeout if `spec.timeout` elapses first
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Canned reply of the mock runner
    #[derive(Debug, Clone)]
    pub enum MockReply {
        Output(CommandOutput),
        Error(ExecutionError),
    }

    impl MockReply {
        pub fn ok(stdout: impl Into<String>) -> Self {
            MockReply::Output(CommandOutput {
                exit_code: Some(0),
                stdout: stdout.into(),
                stderr: String::new(),
                duration_ms: 1,
            })
        }

        pub fn exit(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
            MockReply::Output(CommandOutput {
                exit_code: Some(code),
                stdout: stdout.into(),
                stderr: stderr.into(),
                duration_ms: 1,
            })
        }

        pub fn spawn_error(message: impl Into<String>) -> Self {
            MockReply::Error(ExecutionError::SpawnFailed(message.into()))
        }
    }

    struct Rule {
        prefix: String,
        replies: VecDeque<MockReply>,
    }

    /// Scripted command runner
    ///
    /// Replies are registered per command-line prefix; the longest matching
    /// prefix wins. Queued replies are consumed in order and the last one
    /// repeats. Unmatched commands succeed with empty output.
    #[derive(Clone, Default)]
    pub struct MockCommandRunner {
        rules: Arc<Mutex<Vec<Rule>>>,
        calls: Arc<Mutex<Vec<CommandSpec>>>,
    }

    impl MockCommandRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a reply for commands starting with `prefix`
        pub fn on(&self, prefix: impl Into<String>, reply: MockReply) -> &Self {
            let prefix = prefix.into();
            let mut rules = self.rules.lock().unwrap();
            match rules.iter_mut().find(|r| r.prefix == prefix) {
                Some(rule) => rule.replies.push_back(reply),
                None => rules.push(Rule {
                    prefix,
                    replies: VecDeque::from([reply]),
                }),
            }
            self
        }

        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        /// Number of recorded calls whose command line starts with `prefix`
        pub fn count_matching(&self, prefix: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|spec| spec.command_line().starts_with(prefix))
                .count()
        }

        fn next_reply(&self, line: &str) -> MockReply {
            let mut rules = self.rules.lock().unwrap();
            let rule = rules
                .iter_mut()
                .filter(|r| line.starts_with(&r.prefix))
                .max_by_key(|r| r.prefix.len());

            match rule {
                Some(rule) if rule.replies.len() > 1 => rule.replies.pop_front().unwrap(),
                Some(rule) => rule.replies.front().cloned().unwrap(),
                None => MockReply::ok(""),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for MockCommandRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutionError> {
            self.calls.lock().unwrap().push(spec.clone());
            match self.next_reply(&spec.command_line()) {
                MockReply::Output(output) => Ok(output),
                MockReply::Error(e) => Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::{MockCommandRunner, MockReply};
    use super::*;

    #[test]
    fn test_display_line_redacts_secrets() {
        let spec = CommandSpec::new("git")
            .args(["fetch", "https://s3cr3t@github.com/acme/web.git"])
            .secret("s3cr3t");

        assert_eq!(spec.display_line(), "git fetch https://***@github.com/acme/web.git");
        assert!(spec.command_line().contains("s3cr3t"));
    }

    #[test]
    fn test_empty_secret_is_ignored() {
        let spec = CommandSpec::new("echo").arg("hello").secret("");
        assert_eq!(spec.display_line(), "echo hello");
    }

    #[tokio::test]
    async fn test_mock_runner_longest_prefix_and_sticky_last_reply() {
        let runner = MockCommandRunner::new();
        runner
            .on("docker compose", MockReply::ok("generic"))
            .on("docker compose -f x up", MockReply::exit(1, "", "boom"))
            .on("docker compose -f x up", MockReply::ok("up"));

        let up = CommandSpec::new("docker").args(["compose", "-f", "x", "up", "-d"]);
        let ps = CommandSpec::new("docker").args(["compose", "ps"]);

        assert!(!runner.run(&up).await.unwrap().success());
        assert_eq!(runner.run(&up).await.unwrap().stdout, "up");
        assert_eq!(runner.run(&up).await.unwrap().stdout, "up");
        assert_eq!(runner.run(&ps).await.unwrap().stdout, "generic");
        assert_eq!(runner.count_matching("docker compose -f x up"), 3);
    }
}
