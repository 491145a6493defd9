//! Local environment check

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use vboxdash_host::{Check, CheckStatus, EnvironmentProber, EnvironmentSummary, HostConfig};

use crate::output::{print_list, print_success, print_warning, OutputFormat, TableDisplay};

/// Check row for display
#[derive(Serialize)]
pub struct CheckDisplay {
    #[serde(flatten)]
    check: Check,
}

impl TableDisplay for CheckDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Check", "Status", "Message", "Fix"]
    }

    fn row(&self) -> Vec<String> {
        let status = match self.check.status {
            CheckStatus::Ok => "ok".green().to_string(),
            CheckStatus::Warning => "warning".yellow().to_string(),
            CheckStatus::Error => "error".red().to_string(),
        };
        vec![
            self.check.name.clone(),
            status,
            self.check.message.clone(),
            self.check.fix_instructions.clone().unwrap_or_default(),
        ]
    }
}

pub async fn execute(host: HostConfig, format: OutputFormat) -> Result<()> {
    let checks = EnvironmentProber::new(host).check_environment().await;
    let summary = EnvironmentSummary::from_checks(&checks);

    let rows: Vec<CheckDisplay> = checks.into_iter().map(|check| CheckDisplay { check }).collect();
    print_list(&rows, format);

    if matches!(format, OutputFormat::Table | OutputFormat::Plain) {
        println!();
        if summary.all_ok {
            print_success("Environment ready");
        } else if summary.can_execute_scripts {
            print_warning("Scripts can run, but some checks need attention");
        } else {
            print_warning("Provisioning scripts cannot run on this host");
        }
    }

    if summary.has_errors {
        std::process::exit(1);
    }
    Ok(())
}
