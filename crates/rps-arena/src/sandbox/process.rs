//! Host process runner for operator-configured `command` bots.
//!
//! These bots are trusted programs named in `arena.toml`; clients can never
//! submit one. Each execution still gets a fresh temporary working
//! directory, an environment stripped down to `PATH`, piped stdio with
//! capped capture, and a wall-clock timeout. The bot runs in its own
//! process group, and the whole group is killed once the run is over so
//! nothing it forked outlives the verdict.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::{BotRunResult, Executor, SandboxError};
use crate::bot::{BotExecutionSpec, BotRunType};
use crate::config::SandboxConfig;

/// How long to keep draining output after the process group is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Launch {
    program: String,
    args: Vec<String>,
}

enum Exit {
    Status(ExitStatus),
    TimedOut,
}

/// Kills the process group led by the bot when dropped.
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn kill(&mut self) {
        if let Some(pgid) = self.0.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    // ESRCH just means every member already exited.
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        if e != nix::errno::Errno::ESRCH {
            tracing::warn!("Failed to kill process group {}: {}", pgid, e);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Runs `command` bots as child processes.
pub struct ProcessExecutor {
    timeout: Duration,
    output_limit: usize,
    permits: Arc<Semaphore>,
}

impl ProcessExecutor {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            timeout: config.timeout(),
            output_limit: config.output_limit,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        }
    }

    fn prepare(&self, bot: &BotExecutionSpec) -> Result<Launch, SandboxError> {
        if bot.run_type != BotRunType::Command {
            return Err(SandboxError::Unsupported(bot.run_type));
        }
        let code = bot
            .code
            .as_ref()
            .and_then(|code| code.as_source())
            .ok_or(SandboxError::NoCode)?;
        let mut parts = code.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(SandboxError::EmptyCommand)?;
        Ok(Launch {
            program,
            args: parts.collect(),
        })
    }

    async fn run(&self, launch: Launch, stdin: &str) -> Result<BotRunResult, SandboxError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SandboxError::Closed)?;

        let workdir = tempfile::tempdir().map_err(SandboxError::Workspace)?;

        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .current_dir(workdir.path())
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        #[cfg(unix)]
        command.process_group(0);

        let start = Instant::now();
        let mut child = command.spawn().map_err(SandboxError::Spawn)?;
        let mut group = ProcessGroup(child.id());

        let stdin_pipe = child.stdin.take();
        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_capped(out, self.output_limit)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_capped(err, self.output_limit)));

        let record = format!("{}\n", stdin);
        let waited = timeout(self.timeout, async {
            if let Some(mut pipe) = stdin_pipe {
                // Bots that never read stdin close the pipe early.
                let _ = pipe.write_all(record.as_bytes()).await;
            }
            child.wait().await
        })
        .await;

        let exit = match waited {
            Ok(Ok(status)) => Exit::Status(status),
            Ok(Err(e)) => return Err(SandboxError::Wait(e)),
            Err(_) => Exit::TimedOut,
        };
        group.kill();
        if let Exit::TimedOut = exit {
            let _ = child.kill().await;
        }
        let duration_ms = start.elapsed().as_millis() as u64;

        let stdout = drain(stdout_task).await;
        let stderr = drain(stderr_task).await;

        let result = match exit {
            Exit::Status(status) if status.success() => {
                BotRunResult::from_output(stdin, stdout, stderr, duration_ms)
            }
            Exit::Status(status) => BotRunResult {
                invalid_reason: Some(match status.code() {
                    Some(code) => format!("Program did not exit successfully (exit code {code})."),
                    None => "Program was terminated by a signal.".to_string(),
                }),
                ..BotRunResult::from_output(stdin, stdout, stderr, duration_ms)
            }
            .into_invalid(),
            Exit::TimedOut => BotRunResult {
                invalid_reason: Some(format!(
                    "Timeout! Bots are limited to {}ms",
                    self.timeout.as_millis()
                )),
                ..BotRunResult::from_output(stdin, stdout, stderr, duration_ms)
            }
            .into_invalid(),
        };
        Ok(result)
    }
}

impl Executor for ProcessExecutor {
    async fn execute(&self, bot: &BotExecutionSpec, stdin: &str) -> BotRunResult {
        let outcome = match self.prepare(bot) {
            Ok(launch) => self.run(launch, stdin).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                if let Some(reason) = &result.invalid_reason {
                    tracing::warn!(
                        bot = %bot.name,
                        duration_ms = result.duration_ms,
                        "Invalid play: {}",
                        reason
                    );
                } else {
                    tracing::debug!(
                        bot = %bot.name,
                        duration_ms = result.duration_ms,
                        play = %result.play,
                        "Bot executed"
                    );
                }
                result
            }
            Err(e) => {
                tracing::warn!(bot = %bot.name, "Execution failed: {}", e);
                BotRunResult::invalid(stdin, e.to_string())
            }
        }
    }
}

async fn read_capped<R: AsyncRead + Unpin>(reader: R, limit: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = reader.take(limit as u64).read_to_end(&mut buf).await;
    buf
}

async fn drain(task: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    match timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}
