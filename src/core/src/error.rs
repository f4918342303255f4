//! Crate-level error type and result alias.
//!
//! Each subsystem defines its own `thiserror` enum next to the code that
//! produces it (`ConfigError`, `DriverError`, `PluginError`, ...). This module
//! ties them together into [`QueueError`], the type surfaced by the
//! [`QueueManager`](crate::manager::QueueManager) façade and the worker.
//!
//! Error-handling policy:
//!
//! - Configuration and driver-resolution problems are fatal and propagate
//!   with `?` — a process must not start draining jobs with a broken setup.
//! - Everything inside the running daemon loop degrades to logging; see the
//!   worker module for the containment points.

use thiserror::Error;

/// A specialized Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Top-level error for the queue engine.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// A driver could not be resolved, built, or used.
    #[error(transparent)]
    Driver(#[from] crate::drivers::DriverError),

    /// A plugin failed in a way the caller asked to see (manual registration).
    #[error(transparent)]
    Plugin(#[from] crate::plugins::PluginError),

    /// A connection name that no configuration declares.
    #[error("unknown connection: {0}")]
    UnknownConnection(String),

    /// A connection whose configuration failed driver validation.
    #[error("invalid configuration for connection '{connection}': {}", errors.join("; "))]
    InvalidConnection {
        connection: String,
        errors: Vec<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
