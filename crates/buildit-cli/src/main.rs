//! BuildIt job runner.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "buildit-job")]
#[command(about = "Run a single BuildIt job", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize a working directory and run a command in it
    Run {
        /// Path to the JSON job description
        #[arg(long)]
        job: PathBuf,
        /// Working directory of the job
        #[arg(long)]
        dir: PathBuf,
        /// Worker configuration file
        #[arg(long, default_value = "worker.kdl")]
        config: PathBuf,
        /// Never run commands under a pseudo-terminal
        #[arg(long, env = "BUILDIT_DISABLE_PTY")]
        disable_pty: bool,
        /// Always clone fresh instead of updating an existing checkout
        #[arg(long)]
        no_update: bool,
        /// Command to run once the checkout is ready
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Validate a worker configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "worker.kdl")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Lifecycle events go to stdout; logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
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

    match cli.command {
        Commands::Run {
            job,
            dir,
            config,
            disable_pty,
            no_update,
            command,
        } => {
            let options = commands::run::RunOptions {
                job_path: job,
                dir,
                config_path: config,
                disable_pty,
                no_update,
                command: (!command.is_empty()).then(|| command.join(" ")),
            };
            let code = commands::run::run_job(options).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
