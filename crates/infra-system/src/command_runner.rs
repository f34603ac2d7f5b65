// Process runner built on tokio::process
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use shiparr_core::port::{CommandOutput, CommandRunner, CommandSpec, ExecutionError};

/// Grace period between SIGTERM and SIGKILL for a timed-out child
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Runs commands as child processes with piped output
///
/// The child inherits the daemon environment; `CommandSpec::env` entries are
/// layered on top. Stdin is closed so nothing can block on a prompt.
pub struct TokioCommandRunner {
    kill_grace: Duration,
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self {
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    fn build(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// SIGTERM first, then SIGKILL once the grace period is over
    async fn terminate(&self, child: &mut Child) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                info!(pid = pid, "Sending SIGTERM to timed-out process");
                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                    && timeout(self.kill_grace, child.wait()).await.is_ok()
                {
                    return;
                }
                warn!(pid = pid, "Process did not exit after SIGTERM, sending SIGKILL");
            }
        }

        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill timed-out process");
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!(error = %e, "Output pipe closed with error");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutionError> {
        let started = Instant::now();
        debug!(
            command = %spec.display_line(),
            working_dir = ?spec.working_dir,
            timeout_ms = ?spec.timeout.map(|t| t.as_millis() as u64),
            "Running command"
        );

        let mut child = Self::build(spec).spawn().map_err(|e| {
            let reason = spec.redact(&e.to_string());
            ExecutionError::SpawnFailed(format!("{}: {}", spec.program, reason))
        })?;

        // Drain both pipes concurrently so a chatty child cannot fill one and stall
        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));

        let waited = match spec.timeout {
            Some(limit) => match timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    self.terminate(&mut child).await;
                    stdout.abort();
                    stderr.abort();
                    return Err(ExecutionError::Timeout(limit.as_millis() as i64));
                }
            },
            None => child.wait().await,
        };
        let status = waited.map_err(|e| ExecutionError::IoError(e.to_string()))?;

        let stdout = stdout
            .await
            .map_err(|e| ExecutionError::IoError(e.to_string()))?;
        let stderr = stderr
            .await
            .map_err(|e| ExecutionError::IoError(e.to_string()))?;
        let duration_ms = started.elapsed().as_millis() as i64;

        debug!(
            command = %spec.display_line(),
            exit_code = ?status.code(),
            duration_ms = duration_ms,
            "Command finished"
        );

        Ok(CommandOutput {
            exit_code: status.code(),
            stdout,
            stderr,
            duration_ms,
        })
    }
}
