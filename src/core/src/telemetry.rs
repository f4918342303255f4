//! Structured logging setup.
//!
//! Thin wrapper over `tracing-subscriber`: JSON for production, pretty for
//! development, compact single-line as a middle ground. The library itself
//! only emits `tracing` events; calling [`init_logging`] is the host binary's
//! job (the `conveyor` CLI does it at startup).

use serde::Deserialize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format
    #[serde(default)]
    pub format: LogFormat,

    /// Whether to include target (module path) in events
    #[serde(default = "default_include_target")]
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            include_target: default_include_target(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format for production/structured logging
    Json,
    /// Pretty format for development
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides `config.level` when set. Returns an error if a
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> std::result::Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(config.include_target))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_target(config.include_target))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(config.include_target))
            .try_init(),
    };

    result.map_err(|e| e.to_string())
}


fn default_log_level() -> String {
    "info".to_string()
}

fn default_include_target() -> bool {
    true
}
