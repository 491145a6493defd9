//! Core entity types for VBoxDash

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last known VM power state as recorded in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerStatus {
    Running,
    Stopped,
}

impl Default for PowerStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

impl PowerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for PowerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PowerStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            _ => Err(format!("unknown power status: {}", s)),
        }
    }
}

/// Lifecycle of the most recent script invocation tied to an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl Default for ScriptStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ScriptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Terminal status for a finished invocation.
    pub fn from_outcome(success: bool) -> Self {
        if success {
            Self::Completed
        } else {
            Self::Failed
        }
    }
}

impl std::fmt::Display for ScriptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScriptStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("unknown script status: {}", s)),
        }
    }
}

/// One virtual machine record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub os: String,
    pub cpu: u32,
    /// RAM in GB
    pub ram: u32,
    /// Storage in GB
    pub storage: u32,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub status: PowerStatus,
    #[serde(default)]
    pub script_status: ScriptStatus,
    #[serde(default)]
    pub script_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Instance {
    /// Positional arguments for `create_vm.sh`: name, os, cpu, ram, storage.
    pub fn create_args(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.os.clone(),
            self.cpu.to_string(),
            self.ram.to_string(),
            self.storage.to_string(),
        ]
    }
}

/// Insert payload for an instance row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInstance {
    pub user_id: String,
    pub name: String,
    pub os: String,
    pub cpu: u32,
    pub ram: u32,
    pub storage: u32,
    pub status: PowerStatus,
    pub script_status: ScriptStatus,
}

impl NewInstance {
    /// Database-first provisioning row: stopped, script running.
    pub fn provisioning(user_id: &str, name: &str, os: &str, cpu: u32, ram: u32, storage: u32) -> Self {
        Self {
            user_id: user_id.to_string(),
            name: name.to_string(),
            os: os.to_string(),
            cpu,
            ram,
            storage,
            status: PowerStatus::Stopped,
            script_status: ScriptStatus::Running,
        }
    }
}

/// Partial update of an instance row. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstancePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PowerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_status: Option<ScriptStatus>,
    /// `Some(None)` clears the column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_error: Option<Option<String>>,
}

impl InstancePatch {
    pub fn script_running() -> Self {
        Self {
            script_status: Some(ScriptStatus::Running),
            ..Default::default()
        }
    }

    /// Write back the terminal script status and diagnostic.
    pub fn script_finished(success: bool, error: Option<String>) -> Self {
        Self {
            script_status: Some(ScriptStatus::from_outcome(success)),
            script_error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: PowerStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_script_error(mut self, error: Option<String>) -> Self {
        self.script_error = Some(error);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.script_status.is_none() && self.script_error.is_none()
    }
}

/// Installed software package on an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub instance_id: String,
    pub service_name: String,
    pub status: String,
    pub installed_at: DateTime<Utc>,
}

impl Service {
    pub const INSTALLED: &'static str = "installed";
    pub const FAILED: &'static str = "failed";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewService {
    pub instance_id: String,
    pub service_name: String,
    pub status: String,
}

/// OS-level user account provisioned on an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmUser {
    pub id: String,
    pub instance_id: String,
    pub username: String,
    pub sudo: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVmUser {
    pub instance_id: String,
    pub username: String,
    pub sudo: bool,
}

/// Resource usage reported by `vm-metrics.sh`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VmMetrics {
    pub cpu: f64,
    pub ram_used: f64,
    pub ram_total: f64,
}

impl VmMetrics {
    /// Parse the single-line JSON object printed by the metrics script.
    pub fn parse(output: &str) -> Option<Self> {
        serde_json::from_str(output.trim()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        assert_eq!("running".parse::<PowerStatus>().unwrap(), PowerStatus::Running);
        assert_eq!(ScriptStatus::Completed.to_string(), "completed");
        assert!("booting".parse::<ScriptStatus>().is_err());
    }

    #[test]
    fn test_patch_serializes_only_present_fields() {
        let patch = InstancePatch::script_finished(true, None);
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, serde_json::json!({"script_status": "completed", "script_error": null}));

        let patch = InstancePatch::script_running();
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, serde_json::json!({"script_status": "running"}));
    }

    #[test]
    fn test_metrics_parse() {
        let m = VmMetrics::parse("{\"cpu\": 12.5, \"ram_used\": 1024, \"ram_total\": 4096}\n").unwrap();
        assert_eq!(m.cpu, 12.5);
        assert_eq!(m.ram_total, 4096.0);
        assert!(VmMetrics::parse("not-json").is_none());
        assert!(VmMetrics::parse("{\"cpu\": 1}").is_none());
    }
}
