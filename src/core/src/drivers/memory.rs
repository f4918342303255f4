//! In-process queue driver.
//!
//! Keeps everything in a mutex-guarded map: a FIFO of ready jobs per queue, a
//! delayed set promoted on access, and a failed-jobs list. The reference
//! implementation for the driver contract and the backend used throughout the
//! test suite. State dies with the process.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::{Driver, DriverError, DriverFeature, DriverHealth, DriverInfo, QueueStats};
use crate::jobs::{FailedJob, JobEnvelope, JobId};

#[derive(Default)]
struct MemoryState {
    ready: HashMap<String, VecDeque<JobEnvelope>>,
    delayed: HashMap<String, Vec<JobEnvelope>>,
    failed: Vec<FailedJob>,
    pushed: u64,
    popped: u64,
}

impl MemoryState {
    /// Move due delayed jobs into the ready FIFO, oldest availability first.
    fn promote(&mut self, queue: &str) {
        let now = Utc::now();
        let Some(delayed) = self.delayed.get_mut(queue) else {
            return;
        };
        delayed.sort_by_key(|j| j.available_at);
        let due: Vec<JobEnvelope> = {
            let mut remaining = Vec::new();
            let mut due = Vec::new();
            for job in delayed.drain(..) {
                if job.is_ready(now) {
                    due.push(job);
                } else {
                    remaining.push(job);
                }
            }
            *delayed = remaining;
            due
        };
        let ready = self.ready.entry(queue.to_string()).or_default();
        ready.extend(due);
    }
}

/// In-memory queue driver.
pub struct MemoryDriver {
    default_queue: String,
    default_max_attempts: u32,
    default_timeout_secs: u64,
    state: Mutex<MemoryState>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::from_config(&serde_json::Value::Null)
    }

    /// Build from a connection configuration. Recognized keys: `queue`
    /// (default queue name), `max_attempts`, `timeout`.
    pub fn from_config(config: &serde_json::Value) -> Self {
        Self {
            default_queue: config
                .get("queue")
                .and_then(|v| v.as_str())
                .unwrap_or("default")
                .to_string(),
            default_max_attempts: config
                .get("max_attempts")
                .and_then(|v| v.as_u64())
                .unwrap_or(3) as u32,
            default_timeout_secs: config.get("timeout").and_then(|v| v.as_u64()).unwrap_or(60),
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn driver_info() -> DriverInfo {
        DriverInfo::new("memory")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_author("conveyor")
            .with_description("In-process queue backed by per-queue FIFOs; state dies with the process")
            .with_features([
                DriverFeature::DelayedJobs,
                DriverFeature::FailedJobStore,
                DriverFeature::BulkPush,
            ])
    }

    fn make_envelope(&self, job_type: &str, payload: serde_json::Value, queue: &str) -> JobEnvelope {
        JobEnvelope::new(job_type, payload, queue)
            .with_max_attempts(self.default_max_attempts)
            .with_timeout(self.default_timeout_secs)
    }

    fn queue_name<'a>(&'a self, queue: Option<&'a str>) -> &'a str {
        queue.unwrap_or(&self.default_queue)
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
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
        let queue = self.queue_name(queue);
        let envelope = self.make_envelope(job_type, payload, queue);
        let id = envelope.id;

        let mut state = self.state.lock();
        state.ready.entry(queue.to_string()).or_default().push_back(envelope);
        state.pushed += 1;
        Ok(id)
    }

    async fn later(
        &self,
        delay: Duration,
        job_type: &str,
        payload: serde_json::Value,
        queue: Option<&str>,
    ) -> Result<JobId, DriverError> {
        let queue = self.queue_name(queue);
        let envelope = self.make_envelope(job_type, payload, queue).with_delay(delay);
        let id = envelope.id;

        let mut state = self.state.lock();
        state.delayed.entry(queue.to_string()).or_default().push(envelope);
        state.pushed += 1;
        Ok(id)
    }

    async fn pop(&self, queue: &str) -> Result<Option<JobEnvelope>, DriverError> {
        let mut state = self.state.lock();
        state.promote(queue);
        let job = state.ready.get_mut(queue).and_then(VecDeque::pop_front);
        if job.is_some() {
            state.popped += 1;
        }
        Ok(job)
    }

    async fn release(&self, job: JobEnvelope, delay: Duration) -> Result<(), DriverError> {
        let queue = job.queue.clone();
        let released = job.with_delay(delay);

        let mut state = self.state.lock();
        if delay.is_zero() {
            state.ready.entry(queue).or_default().push_back(released);
        } else {
            state.delayed.entry(queue).or_default().push(released);
        }
        Ok(())
    }

    async fn size(&self, queue: Option<&str>) -> Result<u64, DriverError> {
        let queue = self.queue_name(queue);
        let state = self.state.lock();
        let ready = state.ready.get(queue).map_or(0, VecDeque::len);
        let delayed = state.delayed.get(queue).map_or(0, Vec::len);
        Ok((ready + delayed) as u64)
    }

    async fn purge(&self, queue: Option<&str>) -> Result<u64, DriverError> {
        let queue = self.queue_name(queue);
        let mut state = self.state.lock();
        let ready = state.ready.remove(queue).map_or(0, |q| q.len());
        let delayed = state.delayed.remove(queue).map_or(0, |q| q.len());
        Ok((ready + delayed) as u64)
    }

    async fn stats(&self, queue: Option<&str>) -> Result<QueueStats, DriverError> {
        let queue = self.queue_name(queue);
        let state = self.state.lock();
        Ok(QueueStats {
            pending: state.ready.get(queue).map_or(0, VecDeque::len) as u64,
            delayed: state.delayed.get(queue).map_or(0, Vec::len) as u64,
            failed: state.failed.len() as u64,
            pushed: state.pushed,
            popped: state.popped,
        })
    }

    async fn failed(&self, job: &JobEnvelope, error: &str) -> Result<(), DriverError> {
        self.state.lock().failed.push(FailedJob::new(job.clone(), error));
        Ok(())
    }

    async fn failed_jobs(&self) -> Result<Vec<FailedJob>, DriverError> {
        Ok(self.state.lock().failed.clone())
    }

    async fn health_check(&self) -> DriverHealth {
        let started = Instant::now();
        let state = self.state.lock();
        let pending: usize = state.ready.values().map(VecDeque::len).sum();
        let delayed: usize = state.delayed.values().map(Vec::len).sum();
        DriverHealth::healthy("in-memory store operational", started.elapsed().as_millis() as u64)
            .with_metric("pending", pending)
            .with_metric("delayed", delayed)
            .with_metric("failed", state.failed.len())
    }

    fn info(&self) -> DriverInfo {
        Self::driver_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_push_pop_fifo() {
        let driver = MemoryDriver::new();
        driver.push("first", json!({}), None).await.unwrap();
        driver.push("second", json!({}), None).await.unwrap();

        let a = driver.pop("default").await.unwrap().unwrap();
        let b = driver.pop("default").await.unwrap().unwrap();
        assert_eq!(a.job_type, "first");
        assert_eq!(b.job_type, "second");
        assert!(driver.pop("default").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_later_not_visible_until_due() {
        let driver = MemoryDriver::new();
        driver
            .later(Duration::from_secs(3600), "slow", json!({}), None)
            .await
            .unwrap();

        assert!(driver.pop("default").await.unwrap().is_none());
        assert_eq!(driver.size(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_release_with_zero_delay_is_immediately_ready() {
        let driver = MemoryDriver::new();
        driver.push("job", json!({}), None).await.unwrap();
        let job = driver.pop("default").await.unwrap().unwrap();

        driver.release(job, Duration::ZERO).await.unwrap();
        assert!(driver.pop("default").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_and_stats() {
        let driver = MemoryDriver::new();
        driver.push("a", json!({}), None).await.unwrap();
        driver.push("b", json!({}), Some("other")).await.unwrap();
        driver
            .later(Duration::from_secs(60), "c", json!({}), None)
            .await
            .unwrap();

        let stats = driver.stats(None).await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.delayed, 1);
        assert_eq!(stats.pushed, 3);

        assert_eq!(driver.purge(None).await.unwrap(), 2);
        assert_eq!(driver.size(None).await.unwrap(), 0);
        assert_eq!(driver.size(Some("other")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_store() {
        let driver = MemoryDriver::new();
        let envelope = JobEnvelope::new("doomed", json!({}), "default");
        driver.failed(&envelope, "it broke").await.unwrap();

        let failed = driver.failed_jobs().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error, "it broke");
        assert_eq!(failed[0].job.job_type, "doomed");
    }

    #[tokio::test]
    async fn test_config_defaults_applied() {
        let driver = MemoryDriver::from_config(&json!({
            "queue": "mail", "max_attempts": 5, "timeout": 120
        }));
        driver.push("send", json!({}), None).await.unwrap();

        let job = driver.pop("mail").await.unwrap().unwrap();
        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.timeout_secs, 120);
    }
}
