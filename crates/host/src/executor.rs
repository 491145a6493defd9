//! Provisioning script execution
//!
//! Every run resolves to a [`ScriptOutcome`]. Missing scripts, a missing
//! shell, spawn errors, non-zero exits, timeouts and oversized output are all
//! reported as failed outcomes rather than errors, so callers can always
//! finish reconciling their records.

use crate::classify::{classify, extract_diagnostic, Classification};
use crate::command::ScriptCommand;
use crate::locate::locate_shell;
use crate::platform::HostConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Message returned when no bash could be located on a Windows host.
pub const BASH_NOT_FOUND: &str =
    "Bash not found. Please install Git Bash or ensure bash is in PATH. Database record created.";

const SUCCESS_FALLBACK: &str = "Script executed successfully";

/// Normalized result of one script run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutcome {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScriptOutcome {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }

    /// Diagnostic of a failed run, or a generic placeholder.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("Unknown error")
    }
}

/// Anything able to run a named provisioning script.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run `script` with positional `args`. Never fails; failures are outcomes.
    async fn execute(&self, script: &str, args: &[String]) -> ScriptOutcome;
}

/// Runs scripts from [`HostConfig::scripts_dir`] as child processes.
pub struct ScriptExecutor {
    config: HostConfig,
    spawned: AtomicU64,
}

impl ScriptExecutor {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            spawned: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Number of child processes spawned so far.
    pub fn spawn_count(&self) -> u64 {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn script_exists(&self, script: &str) -> bool {
        self.config.script_path(script).is_file()
    }

    async fn prepare(&self, script_path: &Path, args: &[String]) -> Result<ScriptCommand, ScriptOutcome> {
        let shell = if self.config.platform.is_windows() {
            match locate_shell(&self.config).await {
                Some(shell) => Some(shell),
                None => {
                    warn!("Bash not found, script {} cannot run", script_path.display());
                    return Err(ScriptOutcome::failed("", BASH_NOT_FOUND));
                }
            }
        } else {
            None
        };

        Ok(ScriptCommand::build(
            self.config.platform,
            shell.as_deref(),
            script_path,
            args,
        ))
    }

    async fn run(&self, script: &str, command: &ScriptCommand) -> ScriptOutcome {
        let mut cmd = Command::new(&command.program);
        cmd.arg("-c")
            .arg(&command.line)
            .current_dir(&self.config.scripts_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn {} for {}: {}", command.program.display(), script, e);
                return ScriptOutcome::failed("", format!("Failed to spawn {}: {}", command.program.display(), e));
            }
        };
        self.spawned.fetch_add(1, Ordering::SeqCst);

        let limit = self.config.max_output_bytes;
        let timeout = self.config.script_timeout;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        let finished = {
            let run = async {
                tokio::try_join!(
                    read_capped(stdout, &mut stdout_buf, limit),
                    read_capped(stderr, &mut stderr_buf, limit),
                )?;
                let status = child.wait().await.map_err(RunFault::Io)?;
                Ok::<ExitStatus, RunFault>(status)
            };
            match tokio::time::timeout(timeout, run).await {
                Ok(result) => result,
                Err(_) => Err(RunFault::TimedOut),
            }
        };

        if finished.is_err() {
            terminate(&mut child).await;
        }

        let stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_buf).into_owned();

        let outcome = match finished {
            Ok(status) if status.success() => match classify(&stderr) {
                Classification::Success => {
                    let output = if !stdout.is_empty() {
                        stdout
                    } else if !stderr.is_empty() {
                        stderr.clone()
                    } else {
                        SUCCESS_FALLBACK.to_string()
                    };
                    ScriptOutcome::succeeded(output)
                }
                Classification::Failure(diagnostic) => ScriptOutcome::failed(stdout, diagnostic),
            },
            Ok(status) => {
                let fallback = exit_message(status);
                ScriptOutcome::failed(stdout, extract_diagnostic(&stderr).unwrap_or(fallback))
            }
            Err(fault) => {
                let fallback = match fault {
                    RunFault::TimedOut => format!("Script timed out after {}s", timeout.as_secs()),
                    RunFault::Overflow => format!("Output exceeded {} bytes", limit),
                    RunFault::Io(e) => format!("Failed to read script output: {}", e),
                };
                ScriptOutcome::failed(stdout, extract_diagnostic(&stderr).unwrap_or(fallback))
            }
        };

        if !outcome.success {
            // Arguments may carry credentials; only the script name is logged.
            error!(
                "Script {} failed: {}\nStdout: {}\nStderr: {}",
                script,
                outcome.error_message(),
                if outcome.output.is_empty() { "none" } else { outcome.output.as_str() },
                if stderr.is_empty() { "none" } else { stderr.as_str() },
            );
        }

        outcome
    }
}

#[async_trait]
impl ScriptRunner for ScriptExecutor {
    async fn execute(&self, script: &str, args: &[String]) -> ScriptOutcome {
        let script_path: PathBuf = self.config.script_path(script);
        if !script_path.exists() {
            warn!("Script not found: {}", script_path.display());
            return ScriptOutcome::failed("", format!("Script not found: {}", script_path.display()));
        }

        let command = match self.prepare(&script_path, args).await {
            Ok(command) => command,
            Err(outcome) => return outcome,
        };

        info!("Running script {} ({} args)", script, args.len());
        debug!("Script path: {}", script_path.display());
        let started = Instant::now();
        let outcome = self.run(script, &command).await;
        info!(
            "Script {} finished in {:.1}s: {}",
            script,
            started.elapsed().as_secs_f64(),
            if outcome.success { "success" } else { "failed" }
        );
        outcome
    }
}

enum RunFault {
    Io(std::io::Error),
    Overflow,
    TimedOut,
}

/// Append `reader` into `buf` until EOF; more than `limit` bytes is a fault.
async fn read_capped<R>(reader: Option<R>, buf: &mut Vec<u8>, limit: usize) -> Result<(), RunFault>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };

    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await.map_err(RunFault::Io)?;
        if n == 0 {
            return Ok(());
        }
        if buf.len() + n > limit {
            let room = limit.saturating_sub(buf.len());
            buf.extend_from_slice(&chunk[..room]);
            return Err(RunFault::Overflow);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Kill the child together with everything it started, then reap it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                debug!("killpg({}) failed: {}", pid, e);
            }
        }
    }

    if let Err(e) = child.start_kill() {
        debug!("kill failed: {}", e);
    }
    if let Err(e) = child.wait().await {
        warn!("Failed to reap script process: {}", e);
    }
}

fn exit_message(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("Command failed with exit code {}", code),
        None => "Command terminated by signal".to_string(),
    }
}
