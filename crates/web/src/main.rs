use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vboxdash_web::{ConfigOverrides, DashboardConfig};

#[derive(Parser)]
#[command(name = "vboxdash-web")]
#[command(author, version, about = "VBoxDash web API", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "VBOXDASH_CONFIG", default_value_os_t = vboxdash_common::default_config_path())]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let mut config = DashboardConfig::load(&cli.config)?;
    cli.overrides.apply(&mut config);
    info!("Loaded configuration from {}", cli.config.display());

    vboxdash_web::serve(config).await
}
