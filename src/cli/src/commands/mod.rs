//! CLI subcommands.

pub mod stats;
pub mod work;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use conveyor_core::prelude::*;

/// Build the queue manager shared by every subcommand: load and validate
/// configuration, register the built-in drivers, and wire the handler
/// registry the `sync` driver and workers resolve job types through.
pub fn build_manager(config_path: Option<&Path>) -> Result<Arc<QueueManager>> {
    let config_manager = ConfigManager::new();
    let config = match config_path {
        Some(path) => config_manager
            .load_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => config_manager
            .load_value("defaults", serde_json::json!({}))
            .context("loading default configuration")?,
    };

    let registry = DriverRegistry::new();
    let handlers = Arc::new(HandlerRegistry::new());
    register_builtin_drivers(&registry, &handlers);

    Ok(Arc::new(
        QueueManager::new((*config).clone(), registry).with_handlers(handlers),
    ))
}
