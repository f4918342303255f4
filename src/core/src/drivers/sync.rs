//! Inline-execution driver.
//!
//! `push` runs the job immediately on the calling task through the handler
//! registry; nothing is ever stored and `pop` never yields. A failure is
//! recorded in an in-process failed list and surfaced to the pusher. Delays
//! collapse to immediate execution.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{Driver, DriverError, DriverFeature, DriverHealth, DriverInfo, QueueStats};
use crate::jobs::{FailedJob, HandlerRegistry, JobEnvelope, JobId};

/// Driver that executes jobs inline on push.
pub struct SyncDriver {
    default_queue: String,
    handlers: Arc<HandlerRegistry>,
    failed: Mutex<Vec<FailedJob>>,
    executed: Mutex<u64>,
}

impl SyncDriver {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self::from_config(&serde_json::Value::Null, handlers)
    }

    pub fn from_config(config: &serde_json::Value, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            default_queue: config
                .get("queue")
                .and_then(|v| v.as_str())
                .unwrap_or("default")
                .to_string(),
            handlers,
            failed: Mutex::new(Vec::new()),
            executed: Mutex::new(0),
        }
    }

    pub fn driver_info() -> DriverInfo {
        DriverInfo::new("sync")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_author("conveyor")
            .with_description("Executes jobs inline on the pushing task; nothing is stored")
            .with_features([DriverFeature::FailedJobStore])
    }

    async fn execute(&self, mut envelope: JobEnvelope) -> Result<JobId, DriverError> {
        let id = envelope.id;
        envelope.attempts = 1;
        *self.executed.lock() += 1;

        let Some(handler) = self.handlers.get(&envelope.job_type) else {
            let error = format!("no handler registered for job type '{}'", envelope.job_type);
            self.failed.lock().push(FailedJob::new(envelope, &error));
            return Err(DriverError::Backend(error));
        };

        match handler.handle(&envelope).await {
            Ok(()) => Ok(id),
            Err(e) => {
                handler.on_failure(&envelope, &e).await;
                self.failed.lock().push(FailedJob::new(envelope, e.to_string()));
                Err(DriverError::Backend(format!("sync job failed: {e}")))
            }
        }
    }
}

#[async_trait]
impl Driver for SyncDriver {
    fn name(&self) -> &str {
        "sync"
    }

    fn default_queue(&self) -> &str {
        &self.default_queue
    }

    async fn push(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        queue: Option<&str>,
    ) -> Result<JobId, DriverError> {
        let queue = queue.unwrap_or(&self.default_queue);
        self.execute(JobEnvelope::new(job_type, payload, queue)).await
    }

    async fn later(
        &self,
        _delay: Duration,
        job_type: &str,
        payload: serde_json::Value,
        queue: Option<&str>,
    ) -> Result<JobId, DriverError> {
        debug!(job_type, "Sync driver executes delayed jobs immediately");
        self.push(job_type, payload, queue).await
    }

    async fn pop(&self, _queue: &str) -> Result<Option<JobEnvelope>, DriverError> {
        Ok(None)
    }

    async fn release(&self, job: JobEnvelope, _delay: Duration) -> Result<(), DriverError> {
        Err(DriverError::Unsupported {
            driver: "sync".to_string(),
            operation: format!("release of job {}", job.id),
        })
    }

    async fn size(&self, _queue: Option<&str>) -> Result<u64, DriverError> {
        Ok(0)
    }

    async fn purge(&self, _queue: Option<&str>) -> Result<u64, DriverError> {
        Ok(0)
    }

    async fn stats(&self, _queue: Option<&str>) -> Result<QueueStats, DriverError> {
        Ok(QueueStats {
            failed: self.failed.lock().len() as u64,
            pushed: *self.executed.lock(),
            popped: *self.executed.lock(),
            ..QueueStats::default()
        })
    }

    async fn failed(&self, job: &JobEnvelope, error: &str) -> Result<(), DriverError> {
        self.failed.lock().push(FailedJob::new(job.clone(), error));
        Ok(())
    }

    async fn failed_jobs(&self) -> Result<Vec<FailedJob>, DriverError> {
        Ok(self.failed.lock().clone())
    }

    async fn health_check(&self) -> DriverHealth {
        let started = Instant::now();
        DriverHealth::healthy("sync driver executes inline", started.elapsed().as_millis() as u64)
            .with_metric("executed", *self.executed.lock())
            .with_metric("failed", self.failed.lock().len())
    }

    fn info(&self) -> DriverInfo {
        Self::driver_info()
    }
}
