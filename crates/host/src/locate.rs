//! Executable discovery on the host

use crate::platform::{HostConfig, Platform};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Look `name` up through the platform's native locate command.
///
/// Absence, a failing locate command, or a timeout all yield `None`.
pub async fn find_on_path(platform: Platform, name: &str, timeout: Duration) -> Option<PathBuf> {
    let output = tokio::time::timeout(
        timeout,
        Command::new(platform.locate_command())
            .arg(name)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .ok()?
    .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
}

/// Find a bash-capable shell: well-known install paths first, then PATH.
pub async fn locate_shell(config: &HostConfig) -> Option<PathBuf> {
    for candidate in &config.shell_search_paths {
        if candidate.exists() {
            debug!("Found shell at {}", candidate.display());
            return Some(candidate.clone());
        }
    }
    find_on_path(config.platform, "bash", config.probe_timeout).await
}

/// Run `<program> --version` and return the first line of its output.
pub async fn probe_version(program: &Path, timeout: Duration) -> Result<String, String> {
    let run = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("failed to execute {}: {}", program.display(), e)),
        Err(_) => {
            return Err(format!(
                "{} --version did not finish within {}s",
                program.display(),
                timeout.as_secs()
            ))
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "{} --version exited with {}: {}",
            program.display(),
            output.status,
            stderr.trim()
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("unknown")
        .to_string())
}
