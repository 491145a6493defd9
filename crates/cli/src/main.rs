//! VBoxDash CLI - Main Entry Point
//!
//! Operator tooling around the dashboard: check this host, run a
//! provisioning script by hand, or inspect servers through the web API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod client;
mod commands;
mod output;

use commands::{env, exec, servers};
use vboxdash_host::HostConfig;

/// VBoxDash CLI - VirtualBox provisioning dashboard
#[derive(Parser)]
#[command(name = "vboxdash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Dashboard API address
    #[arg(long, env = "VBOXDASH_API_URL", default_value = "http://127.0.0.1:3000", global = true)]
    api_url: String,

    /// Access token for the dashboard API
    #[arg(long, env = "VBOXDASH_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Provisioning scripts directory
    #[arg(long, env = "VBOXDASH_SCRIPTS_DIR", default_value = "./scripts", global = true)]
    scripts_dir: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether this host can run provisioning scripts
    Env,

    /// Run a provisioning script locally
    Exec(exec::ExecArgs),

    /// Manage servers through the dashboard API
    #[command(subcommand)]
    Servers(servers::ServersCommands),

    /// Check dashboard API status
    Status,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let host = HostConfig::detect(&cli.scripts_dir);

    match cli.command {
        Commands::Env => env::execute(host, cli.format).await?,
        Commands::Exec(args) => exec::execute(args, host, cli.format).await?,
        Commands::Servers(cmd) => {
            let client = client::ApiClient::new(&cli.api_url, cli.token);
            servers::execute(cmd, client, cli.format).await?
        }
        Commands::Status => {
            let client = client::ApiClient::new(&cli.api_url, cli.token);
            if client.health_check().await {
                println!("✅ Dashboard API is running at {}", cli.api_url);
            } else {
                println!("❌ Dashboard API is not responding at {}", cli.api_url);
                std::process::exit(1);
            }
        }
        Commands::Version => {
            println!("VBoxDash CLI v{}", vboxdash_common::VERSION);
            println!("VirtualBox provisioning through shell automation");
        }
    }

    Ok(())
}
