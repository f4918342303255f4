//! The `conveyor stats` subcommand: queue statistics and connection health.

use anyhow::Result;
use clap::Args;
use std::path::Path;

#[derive(Args)]
pub struct StatsArgs {
    /// Connection to inspect (defaults to the configured default connection)
    #[arg(long)]
    connection: Option<String>,

    /// Queue to inspect
    #[arg(long)]
    queue: Option<String>,
}

pub async fn execute(args: StatsArgs, config_path: Option<&Path>) -> Result<()> {
    let manager = super::build_manager(config_path)?;
    let connection = args.connection.as_deref();
    let queue = args.queue.as_deref();

    let stats = manager.stats(queue, connection).await?;
    let health = manager.test_connection(connection).await;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "connection": health.connection,
            "healthy": health.healthy,
            "message": health.message,
            "response_time_ms": health.response_time_ms,
            "stats": stats,
        }))?
    );
    Ok(())
}
