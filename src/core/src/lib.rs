//! # Conveyor Core
//!
//! A pluggable queue/worker job-processing engine.
//!
//! ## Architecture
//!
//! - **QueueManager**: the façade owning named connections (lazily built,
//!   cached driver instances) and delegating push/size/purge/stats to them
//! - **Worker**: the daemon loop — fetch, execute with a deadline, retry with
//!   exponential backoff or fail, heartbeat, honor memory/runtime limits
//! - **Drivers**: pluggable storage backends (memory, sync, null, redis,
//!   database) behind a factory registry with per-driver config validation
//! - **Discovery**: explicit provider registration by source scope, with
//!   per-candidate validation that never fails wholesale
//! - **Plugins**: typed plugins contributing drivers, wildcard event
//!   listeners, and synchronous best-effort hooks
//! - **Config**: defaults merge, `env()` placeholder resolution, and
//!   fail-fast validation before anything is built

pub mod config;
pub mod drivers;
pub mod error;
pub mod jobs;
pub mod manager;
pub mod monitor;
pub mod plugins;
pub mod telemetry;
pub mod worker;

pub use error::{QueueError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigManager, ConfigValidator, QueueConfig, ValidationReport};
    pub use crate::drivers::{
        registry::register_builtin_drivers, Driver, DriverDiscovery, DriverError, DriverFeature,
        DriverHealth, DriverInfo, DriverProvider, DriverRegistry, MemoryDriver, NullDriver,
        QueueStats, SourceScope,
    };
    pub use crate::error::{QueueError, Result};
    pub use crate::jobs::{
        FnHandler, HandlerRegistry, Job, JobEnvelope, JobError, JobHandler, JobId, JobResult,
        QueuedJob,
    };
    pub use crate::manager::{ConnectionTest, QueueManager};
    pub use crate::monitor::{
        InMemoryMonitor, NullMonitor, WorkerHeartbeat, WorkerMonitor, WorkerRegistration,
    };
    pub use crate::plugins::{
        DriverRegistration, HookBinding, ListenerSpec, Plugin, PluginManager, PluginManifest,
    };
    pub use crate::worker::{
        calculate_retry_delay, ProcessOutcome, StopReason, Worker, WorkerOptions, WorkerReport,
    };
}
