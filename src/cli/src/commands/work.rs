//! The `conveyor work` subcommand: a long-running worker daemon.

use anyhow::Result;
use clap::Args;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use conveyor_core::prelude::*;

#[derive(Args)]
pub struct WorkArgs {
    /// Connection to drain (defaults to the configured default connection)
    #[arg(long)]
    connection: Option<String>,

    /// Queue to drain
    #[arg(long, default_value = "default")]
    queue: String,

    /// Seconds to sleep when the queue is empty
    #[arg(long, default_value_t = 3)]
    sleep: u64,

    /// Memory ceiling in MB before the worker stops (0 = unlimited)
    #[arg(long, default_value_t = 128)]
    memory: u64,

    /// Jobs to process before stopping (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_jobs: u64,

    /// Seconds of wall-clock runtime before stopping (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_time: u64,

    /// Stop as soon as the queue is empty
    #[arg(long)]
    stop_when_empty: bool,

    /// Log heartbeat failures and other chatter
    #[arg(short, long)]
    verbose: bool,

    /// Collect up to this many jobs per iteration and process them as a batch
    #[arg(long)]
    batch: Option<usize>,
}

pub async fn execute(args: WorkArgs, config_path: Option<&Path>) -> Result<()> {
    let manager = super::build_manager(config_path)?;
    let connection = args
        .connection
        .unwrap_or_else(|| manager.config().default.clone());

    let options = WorkerOptions {
        sleep: Duration::from_secs(args.sleep),
        memory_mb: args.memory,
        max_jobs: args.max_jobs,
        max_time: Duration::from_secs(args.max_time),
        stop_when_empty: args.stop_when_empty,
        verbose: args.verbose,
        batch_size: args.batch,
    };

    let monitor = Arc::new(InMemoryMonitor::new());
    let worker = Worker::new(Arc::clone(&manager), options)
        .with_monitor(monitor as Arc<dyn WorkerMonitor>);

    let report = worker.daemon(&connection, &args.queue).await?;
    println!(
        "worker stopped ({:?}): processed={} failed={} runtime={}s",
        report.reason,
        report.processed,
        report.failed,
        report.runtime.as_secs()
    );
    Ok(())
}
