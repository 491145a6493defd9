//! Server commands against a running dashboard API

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use serde_json::Value;
use vboxdash_common::{Instance, VmMetrics};

use crate::client::ApiClient;
use crate::output::{print_error, print_item, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ServersCommands {
    /// List servers
    List,

    /// Show one server with its services and users
    Get {
        /// Instance ID
        id: String,
    },

    /// Start a server
    Start { id: String },

    /// Stop a server
    Stop { id: String },

    /// Delete a server and its VM
    Delete { id: String },

    /// Re-run the provisioning script
    Retry { id: String },

    /// Show resource usage
    Metrics { id: String },
}

/// Instance display wrapper for serialization
#[derive(Serialize)]
pub struct ServerDisplay {
    pub id: String,
    pub name: String,
    pub os: String,
    pub status: String,
    pub script_status: String,
    pub cpu: u32,
    pub ram_gb: u32,
    pub storage_gb: u32,
    pub created: String,
}

impl From<Instance> for ServerDisplay {
    fn from(i: Instance) -> Self {
        Self {
            id: i.id,
            name: i.name,
            os: i.os,
            status: i.status.to_string(),
            script_status: i.script_status.to_string(),
            cpu: i.cpu,
            ram_gb: i.ram,
            storage_gb: i.storage,
            created: i.created_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

impl TableDisplay for ServerDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "OS", "Status", "Script", "CPU", "RAM", "Storage", "Created"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.os.clone(),
            self.status.clone(),
            self.script_status.clone(),
            self.cpu.to_string(),
            format!("{}GB", self.ram_gb),
            format!("{}GB", self.storage_gb),
            self.created.clone(),
        ]
    }
}

#[derive(Serialize)]
pub struct MetricsDisplay(VmMetrics);

impl TableDisplay for MetricsDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["CPU %", "RAM Used", "RAM Total"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            format!("{:.1}", self.0.cpu),
            format!("{:.0}", self.0.ram_used),
            format!("{:.0}", self.0.ram_total),
        ]
    }
}

fn report(result: &Value, done: &str) {
    if result.get("success").and_then(Value::as_bool).unwrap_or(true) {
        let message = result.get("message").and_then(Value::as_str).unwrap_or(done);
        print_success(message);
    } else {
        print_error(result.get("error").and_then(Value::as_str).unwrap_or("action failed"));
    }
    if let Some(detail) = result.get("scriptResult").and_then(Value::as_str) {
        println!("   script: {}", detail);
    }
}

pub async fn execute(cmd: ServersCommands, client: ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        ServersCommands::List => {
            let servers = client.list_servers().await?;
            let displays: Vec<ServerDisplay> = servers.into_iter().map(ServerDisplay::from).collect();
            print_list(&displays, format);
        }

        ServersCommands::Get { id } => {
            let detail = client.get_server(&id).await?;
            let error = detail.instance.script_error.clone();
            print_item(&ServerDisplay::from(detail.instance), format);
            if matches!(format, OutputFormat::Table | OutputFormat::Plain) {
                if let Some(error) = error {
                    println!("Last script error: {}", error);
                }
                let services: Vec<String> = detail
                    .services
                    .iter()
                    .map(|s| format!("{} ({})", s.service_name, s.status))
                    .collect();
                let users: Vec<String> = detail
                    .users
                    .iter()
                    .map(|u| if u.sudo { format!("{} (sudo)", u.username) } else { u.username.clone() })
                    .collect();
                println!("Services: {}", if services.is_empty() { "none".to_string() } else { services.join(", ") });
                println!("Users: {}", if users.is_empty() { "none".to_string() } else { users.join(", ") });
            }
        }

        ServersCommands::Start { id } => report(&client.action(&id, "start").await?, "Server started"),
        ServersCommands::Stop { id } => report(&client.action(&id, "stop").await?, "Server stopped"),
        ServersCommands::Delete { id } => report(&client.action(&id, "delete").await?, "Server deleted"),
        ServersCommands::Retry { id } => report(&client.action(&id, "retry-script").await?, "Script re-run"),

        ServersCommands::Metrics { id } => {
            let metrics = client.metrics(&id).await?;
            print_item(&MetricsDisplay(metrics), format);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vboxdash_common::{PowerStatus, ScriptStatus};

    #[test]
    fn test_server_row() {
        let instance = Instance {
            id: "i-1".to_string(),
            user_id: "u-1".to_string(),
            name: "web1".to_string(),
            os: "Ubuntu".to_string(),
            cpu: 2,
            ram: 4,
            storage: 20,
            ip_address: None,
            status: PowerStatus::Running,
            script_status: ScriptStatus::Failed,
            script_error: Some("[ERROR] disk full".to_string()),
            created_at: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap(),
        };

        let row = ServerDisplay::from(instance).row();
        assert_eq!(row.len(), ServerDisplay::headers().len());
        assert_eq!(row[3], "running");
        assert_eq!(row[4], "failed");
        assert_eq!(row[6], "4GB");
        assert_eq!(row[8], "2024-05-01 10:30");
    }
}
