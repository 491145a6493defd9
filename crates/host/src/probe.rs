//! Environment readiness probes
//!
//! Answers "can this host run provisioning scripts right now?" without
//! touching anything. Absence of a tool is reported through [`CheckStatus`],
//! never as an error.

use crate::locate::{find_on_path, probe_version};
use crate::platform::{HostConfig, Platform};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const HYPERVISOR_CHECK: &str = "VirtualBox";
pub const SHELL_CHECK: &str = "Bash";
pub const WINDOWS_SHELL_CHECK: &str = "Bash (Git Bash)";
pub const SCRIPTS_CHECK: &str = "Scripts";
pub const SCRIPTS_DIR_CHECK: &str = "Scripts Directory";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

/// One diagnostic line item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Check {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub fixable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_instructions: Option<String>,
}

impl Check {
    pub fn ok(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            message: message.into(),
            fixable: false,
            fix_instructions: None,
        }
    }

    pub fn warning(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Warning,
            ..Self::ok(name, message)
        }
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Error,
            ..Self::ok(name, message)
        }
    }

    /// Attach remediation text; marks the check as fixable.
    pub fn with_fix(mut self, instructions: impl Into<String>) -> Self {
        self.fixable = true;
        self.fix_instructions = Some(instructions.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == CheckStatus::Ok
    }
}

/// Roll-up of a full environment check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSummary {
    pub all_ok: bool,
    pub has_errors: bool,
    pub has_warnings: bool,
    /// Hypervisor and shell are usable; the script inventory is informational.
    pub can_execute_scripts: bool,
}

impl EnvironmentSummary {
    pub fn from_checks(checks: &[Check]) -> Self {
        let check_ok = |needle: &str| {
            checks
                .iter()
                .find(|c| c.name.contains(needle))
                .map(Check::is_ok)
                .unwrap_or(false)
        };

        Self {
            all_ok: checks.iter().all(Check::is_ok),
            has_errors: checks.iter().any(|c| c.status == CheckStatus::Error),
            has_warnings: checks.iter().any(|c| c.status == CheckStatus::Warning),
            can_execute_scripts: check_ok(HYPERVISOR_CHECK) && check_ok(SHELL_CHECK),
        }
    }
}

/// Read-only host prober
#[derive(Debug, Clone)]
pub struct EnvironmentProber {
    config: HostConfig,
}

impl EnvironmentProber {
    pub fn new(config: HostConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Run all probes concurrently; results come back as hypervisor, shell, scripts.
    pub async fn check_environment(&self) -> Vec<Check> {
        let (hypervisor, shell, scripts) = tokio::join!(
            self.probe_hypervisor(),
            self.probe_shell(),
            async { self.probe_script_inventory() },
        );
        vec![hypervisor, shell, scripts]
    }

    pub async fn probe_hypervisor(&self) -> Check {
        let timeout = self.config.probe_timeout;
        let mut candidates: Vec<PathBuf> = self
            .config
            .hypervisor_paths
            .iter()
            .filter(|p| p.exists())
            .cloned()
            .collect();
        if let Some(found) = find_on_path(self.config.platform, &self.config.hypervisor_binary, timeout).await {
            if !candidates.contains(&found) {
                candidates.push(found);
            }
        }

        let mut last_failure = None;
        for candidate in &candidates {
            match probe_version(candidate, timeout).await {
                Ok(version) => {
                    return Check::ok(
                        HYPERVISOR_CHECK,
                        format!(
                            "VirtualBox is installed and accessible at {} (version {})",
                            candidate.display(),
                            version
                        ),
                    );
                }
                Err(e) => {
                    debug!("Hypervisor candidate {} unusable: {}", candidate.display(), e);
                    last_failure = Some(e);
                }
            }
        }

        match last_failure {
            Some(failure) => Check::error(
                HYPERVISOR_CHECK,
                format!("VBoxManage was found but could not be executed: {}", failure),
            )
            .with_fix(self.hypervisor_repair_instructions()),
            None => Check::error(
                HYPERVISOR_CHECK,
                "VirtualBox is not installed or VBoxManage is not in PATH",
            )
            .with_fix(self.hypervisor_install_instructions()),
        }
    }

    pub async fn probe_shell(&self) -> Check {
        let timeout = self.config.probe_timeout;
        match self.config.platform {
            Platform::Unix => match probe_version(Path::new("bash"), timeout).await {
                Ok(_) => Check::ok(SHELL_CHECK, "Bash is available"),
                Err(e) => {
                    debug!("bash probe failed: {}", e);
                    Check::error(SHELL_CHECK, "Bash is not available").with_fix(
                        "Install bash: sudo apt-get install bash (Linux) or it should be pre-installed on macOS",
                    )
                }
            },
            Platform::Windows => {
                if let Some(candidate) = self.config.shell_search_paths.iter().find(|p| p.exists()) {
                    return match probe_version(candidate, timeout).await {
                        Ok(_) => Check::ok(
                            WINDOWS_SHELL_CHECK,
                            format!("Git Bash is installed at {}", candidate.display()),
                        ),
                        Err(e) => Check::error(
                            WINDOWS_SHELL_CHECK,
                            format!("Git Bash was found but could not be executed: {}", e),
                        )
                        .with_fix("Reinstall Git Bash from https://git-scm.com/download/win"),
                    };
                }

                if let Some(found) = find_on_path(self.config.platform, "bash", timeout).await {
                    return match probe_version(&found, timeout).await {
                        Ok(_) => Check::ok(SHELL_CHECK, "Bash is available in PATH"),
                        Err(e) => Check::error(
                            SHELL_CHECK,
                            format!("Bash was found in PATH but could not be executed: {}", e),
                        )
                        .with_fix("Reinstall Git Bash from https://git-scm.com/download/win or repair WSL"),
                    };
                }

                Check::warning(SHELL_CHECK, "Bash not found. Scripts will be simulated.").with_fix(
                    "Install Git Bash from https://git-scm.com/download/win and add it to PATH, or install WSL",
                )
            }
        }
    }

    pub fn probe_script_inventory(&self) -> Check {
        let dir = &self.config.scripts_dir;
        if !dir.is_dir() {
            return Check::error(
                SCRIPTS_DIR_CHECK,
                format!("Scripts directory not found: {}", dir.display()),
            );
        }

        let missing: Vec<&str> = self
            .config
            .required_scripts
            .iter()
            .map(String::as_str)
            .filter(|script| !dir.join(script).is_file())
            .collect();

        if missing.is_empty() {
            Check::ok(SCRIPTS_CHECK, "All required scripts are present")
        } else {
            Check::error(SCRIPTS_CHECK, format!("Missing scripts: {}", missing.join(", ")))
        }
    }

    fn hypervisor_install_instructions(&self) -> &'static str {
        match self.config.platform {
            Platform::Windows => {
                "1. Download VirtualBox from https://www.virtualbox.org/wiki/Downloads\n\
                 2. Run the installer with default options\n\
                 3. Add C:\\Program Files\\Oracle\\VirtualBox to your PATH\n\
                 4. Restart the dashboard"
            }
            Platform::Unix => {
                "1. Install VirtualBox: sudo apt-get install virtualbox (Ubuntu/Debian) or brew install --cask virtualbox (macOS)\n\
                 2. Make sure VBoxManage is on your PATH: which VBoxManage\n\
                 3. Restart the dashboard"
            }
        }
    }

    fn hypervisor_repair_instructions(&self) -> &'static str {
        match self.config.platform {
            Platform::Windows => {
                "VBoxManage exists but failed to run. Repair or reinstall VirtualBox from https://www.virtualbox.org/ \
                 and make sure the VirtualBox services are allowed to start."
            }
            Platform::Unix => {
                "VBoxManage exists but failed to run. Check that the vboxdrv kernel module is loaded \
                 (sudo /sbin/vboxconfig) and that your user belongs to the vboxusers group."
            }
        }
    }
}
