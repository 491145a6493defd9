//! Run a provisioning script locally

use anyhow::Result;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use vboxdash_host::locate::locate_shell;
use vboxdash_host::{HostConfig, ScriptCommand, ScriptExecutor, ScriptRunner};

use crate::output::{print_error, print_success, OutputFormat};

#[derive(Args)]
pub struct ExecArgs {
    /// Script name inside the scripts directory
    pub script: String,

    /// Positional arguments passed to the script
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Print the command line instead of running it
    #[arg(long)]
    pub dry_run: bool,

    /// Timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

pub async fn execute(args: ExecArgs, mut host: HostConfig, format: OutputFormat) -> Result<()> {
    if let Some(secs) = args.timeout {
        host = host.with_script_timeout(Duration::from_secs(secs));
    }

    if args.dry_run {
        let shell = if host.platform.is_windows() {
            locate_shell(&host).await
        } else {
            None
        };
        let command = ScriptCommand::build(host.platform, shell.as_deref(), &host.script_path(&args.script), &args.args);
        println!("{}", command.display());
        return Ok(());
    }

    let executor = ScriptExecutor::new(host);
    if !executor.script_exists(&args.script) {
        anyhow::bail!("no script named {} in {}", args.script, executor.config().scripts_dir.display());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")?);
    spinner.set_message(format!("Running {}", args.script));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let outcome = executor.execute(&args.script, &args.args).await;
    spinner.finish_and_clear();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(&outcome)?),
        OutputFormat::Table | OutputFormat::Plain => {
            if !outcome.output.is_empty() {
                print!("{}", outcome.output);
                if !outcome.output.ends_with('\n') {
                    println!();
                }
            }
            if outcome.success {
                print_success(&format!("{} completed", args.script));
            } else {
                print_error(outcome.error_message());
            }
        }
    }

    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}
