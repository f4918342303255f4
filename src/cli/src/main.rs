//! Conveyor CLI - run queue workers and inspect queues from the command line.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{stats, work};

/// Conveyor - queue worker runner
#[derive(Parser)]
#[command(
    name = "conveyor",
    version = "0.1.0",
    about = "Conveyor - queue worker runner",
    long_about = "Run long-lived queue workers and inspect queue state.",
    propagate_version = true
)]
pub struct Cli {
    /// Path to the queue configuration file (TOML or JSON)
    #[arg(short, long, global = true, env = "CONVEYOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a worker daemon draining one connection/queue pair
    Work(work::WorkArgs),

    /// Show queue statistics and connection health
    Stats(stats::StatsArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    conveyor_core::telemetry::init_logging(&conveyor_core::telemetry::LoggingConfig::default())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let result = match cli.command {
        Commands::Work(args) => work::execute(args, cli.config.as_deref()).await,
        Commands::Stats(args) => stats::execute(args, cli.config.as_deref()).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
