//! Discard-everything driver.
//!
//! Accepts pushes and throws them away; `pop` never yields a job. Useful for
//! disabling queue processing in an environment without touching producer
//! code.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{Driver, DriverError, DriverHealth, DriverInfo, QueueStats};
use crate::jobs::{JobEnvelope, JobId};

/// Driver that accepts and discards every job.
#[derive(Default)]
pub struct NullDriver {
    discarded: AtomicU64,
}

impl NullDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driver_info() -> DriverInfo {
        DriverInfo::new("null")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_author("conveyor")
            .with_description("Accepts and discards all jobs")
    }

    /// How many jobs have been discarded.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Driver for NullDriver {
    fn name(&self) -> &str {
        "null"
    }

    async fn push(
        &self,
        _job_type: &str,
        _payload: serde_json::Value,
        _queue: Option<&str>,
    ) -> Result<JobId, DriverError> {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        Ok(JobId::new())
    }

    async fn later(
        &self,
        _delay: Duration,
        job_type: &str,
        payload: serde_json::Value,
        queue: Option<&str>,
    ) -> Result<JobId, DriverError> {
        self.push(job_type, payload, queue).await
    }

    async fn pop(&self, _queue: &str) -> Result<Option<JobEnvelope>, DriverError> {
        Ok(None)
    }

    async fn release(&self, _job: JobEnvelope, _delay: Duration) -> Result<(), DriverError> {
        Ok(())
    }

    async fn size(&self, _queue: Option<&str>) -> Result<u64, DriverError> {
        Ok(0)
    }

    async fn purge(&self, _queue: Option<&str>) -> Result<u64, DriverError> {
        Ok(0)
    }

    async fn stats(&self, _queue: Option<&str>) -> Result<QueueStats, DriverError> {
        Ok(QueueStats {
            pushed: self.discarded.load(Ordering::Relaxed),
            ..QueueStats::default()
        })
    }

    async fn failed(&self, _job: &JobEnvelope, _error: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn health_check(&self) -> DriverHealth {
        DriverHealth::healthy("null driver discards everything", 0)
    }

    fn info(&self) -> DriverInfo {
        Self::driver_info()
    }
}
