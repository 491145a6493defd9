//! Host platform model and configuration
//!
//! The prober and the executor never consult process-global state for the
//! platform or the scripts location; both receive a [`HostConfig`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Scripts every provisioning host is expected to carry.
pub const REQUIRED_SCRIPTS: &[&str] = &[
    "create_vm.sh",
    "start-vm.sh",
    "stop-vm.sh",
    "destroy_vm.sh",
    "install_service.sh",
    "manage_users.sh",
];

/// Hard ceiling on a single script run.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for `--version` style probes.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-stream capture limit for script output (10 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// OS family the host belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    /// Platform of the running build target.
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }

    /// Native "locate executable on PATH" command.
    pub fn locate_command(&self) -> &'static str {
        match self {
            Self::Unix => "which",
            Self::Windows => "where",
        }
    }

    /// Well-known hypervisor CLI install locations.
    pub fn default_hypervisor_paths(&self) -> Vec<PathBuf> {
        match self {
            Self::Windows => vec![
                PathBuf::from(r"C:\Program Files\Oracle\VirtualBox\VBoxManage.exe"),
                PathBuf::from(r"C:\Program Files (x86)\Oracle\VirtualBox\VBoxManage.exe"),
            ],
            Self::Unix => vec![
                PathBuf::from("/usr/bin/VBoxManage"),
                PathBuf::from("/usr/local/bin/VBoxManage"),
            ],
        }
    }

    /// Well-known bash installer locations. Unix hosts rely on PATH.
    pub fn default_shell_paths(&self) -> Vec<PathBuf> {
        match self {
            Self::Windows => vec![
                PathBuf::from(r"C:\Program Files\Git\bin\bash.exe"),
                PathBuf::from(r"C:\Program Files (x86)\Git\bin\bash.exe"),
                PathBuf::from(r"C:\Program Files\Git\usr\bin\bash.exe"),
            ],
            Self::Unix => Vec::new(),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix => write!(f, "unix"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

/// Configuration shared by the prober and the executor
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub platform: Platform,
    /// Directory holding the automation scripts; also the child working directory.
    pub scripts_dir: PathBuf,
    /// Candidate bash locations searched before PATH.
    pub shell_search_paths: Vec<PathBuf>,
    /// Candidate hypervisor CLI locations searched before PATH.
    pub hypervisor_paths: Vec<PathBuf>,
    /// Executable name of the hypervisor CLI for PATH lookup.
    pub hypervisor_binary: String,
    pub required_scripts: Vec<String>,
    pub probe_timeout: Duration,
    pub script_timeout: Duration,
    pub max_output_bytes: usize,
}

impl HostConfig {
    /// Defaults for `platform` with scripts under `scripts_dir`.
    ///
    /// A relative `scripts_dir` on the running platform is anchored at the
    /// current directory, since children run with it as their working directory.
    pub fn for_platform(platform: Platform, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            scripts_dir: anchor_scripts_dir(platform, scripts_dir.into()),
            shell_search_paths: platform.default_shell_paths(),
            hypervisor_paths: platform.default_hypervisor_paths(),
            hypervisor_binary: "VBoxManage".to_string(),
            required_scripts: REQUIRED_SCRIPTS.iter().map(|s| s.to_string()).collect(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Defaults for the running host.
    pub fn detect(scripts_dir: impl Into<PathBuf>) -> Self {
        Self::for_platform(Platform::current(), scripts_dir)
    }

    pub fn with_script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn with_shell_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.shell_search_paths = paths;
        self
    }

    /// Absolute location of a named script.
    pub fn script_path(&self, script_name: &str) -> PathBuf {
        self.scripts_dir.join(script_name)
    }
}

fn anchor_scripts_dir(platform: Platform, dir: PathBuf) -> PathBuf {
    if dir.is_absolute() || platform != Platform::current() {
        return dir;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(dir.strip_prefix(".").unwrap_or(&dir)),
        Err(_) => dir,
    }
}

/// Translate a Windows path into the form Git Bash expects.
///
/// `C:\Users\me\scripts\a.sh` becomes `/c/Users/me/scripts/a.sh`.
pub fn to_posix_path(path: &Path) -> String {
    let forward = path.to_string_lossy().replace('\\', "/");
    let mut chars = forward.chars();
    match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic() => {
            format!("/{}{}", drive.to_ascii_lowercase(), chars.as_str())
        }
        _ => forward,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posix_path_translation() {
        assert_eq!(
            to_posix_path(Path::new(r"C:\Users\me\app\scripts\create_vm.sh")),
            "/c/Users/me/app/scripts/create_vm.sh"
        );
        assert_eq!(to_posix_path(Path::new(r"d:\x.sh")), "/d/x.sh");
        assert_eq!(to_posix_path(Path::new("/opt/scripts/a.sh")), "/opt/scripts/a.sh");
    }

    #[test]
    fn test_platform_defaults() {
        let win = HostConfig::for_platform(Platform::Windows, r"C:\app\scripts");
        assert_eq!(win.shell_search_paths.len(), 3);
        assert!(win.hypervisor_paths[0].to_string_lossy().ends_with("VBoxManage.exe"));
        assert_eq!(win.platform.locate_command(), "where");

        let unix = HostConfig::for_platform(Platform::Unix, "/srv/scripts");
        assert!(unix.shell_search_paths.is_empty());
        assert_eq!(unix.script_path("stop-vm.sh"), PathBuf::from("/srv/scripts/stop-vm.sh"));
        assert_eq!(unix.script_timeout, Duration::from_secs(300));
        assert_eq!(unix.max_output_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_relative_scripts_dir_is_anchored() {
        let cwd = std::env::current_dir().unwrap();

        let config = HostConfig::detect("./scripts");
        assert!(config.scripts_dir.is_absolute());
        assert_eq!(config.scripts_dir, cwd.join("scripts"));
        assert_eq!(config.script_path("create_vm.sh"), cwd.join("scripts").join("create_vm.sh"));

        let nested = HostConfig::detect("ops/scripts");
        assert_eq!(nested.scripts_dir, cwd.join("ops/scripts"));
    }
}
