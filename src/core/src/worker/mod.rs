//! The daemon that drains a connection/queue pair.
//!
//! Single cooperative loop per worker; parallelism comes from running
//! multiple worker processes, each with its own `Worker`. The loop fetches a
//! job, processes it with a deadline, reports a heartbeat, and checks its
//! resource limits — once per iteration, never preemptively, so a job that is
//! already executing always finishes (or times out) before a stop request is
//! honored.
//!
//! Containment rules: fetch errors are treated as an empty queue; job
//! execution errors (including panics and the injected deadline timeout) are
//! always caught at the per-job level; monitor errors are logged and
//! swallowed (heartbeat errors only in verbose mode). Only configuration and
//! driver-resolution failures propagate out of [`Worker::daemon`].

use chrono::Utc;
use futures::FutureExt;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WorkersConfig;
use crate::error::Result;
use crate::jobs::{Job, JobError, QueuedJob};
use crate::manager::QueueManager;
use crate::monitor::{
    NullMonitor, WorkerFinalStats, WorkerHeartbeat, WorkerMonitor, WorkerRegistration,
};

/// Retry backoff: `min(300, 2^attempts)` seconds. Monotonically
/// non-decreasing in `attempts`, capped at five minutes. No jitter.
pub fn calculate_retry_delay(attempts: u32) -> u64 {
    if attempts >= 9 {
        300
    } else {
        (1u64 << attempts).min(300)
    }
}

/// Resident memory of this process in bytes. Returns 0 on platforms where it
/// cannot be read, which disables memory-based limits.
pub fn current_memory_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(resident) = statm
                .split_whitespace()
                .nth(1)
                .and_then(|field| field.parse::<u64>().ok())
            {
                let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
                if page_size > 0 {
                    return resident * page_size as u64;
                }
            }
        }
        0
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

fn current_memory_mb() -> u64 {
    current_memory_bytes() / (1024 * 1024)
}

fn hostname() -> String {
    #[cfg(unix)]
    {
        let mut buf = [0u8; 256];
        let result = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
        if result == 0 {
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            return String::from_utf8_lossy(&buf[..end]).into_owned();
        }
    }
    "unknown".to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Worker Options
// ═══════════════════════════════════════════════════════════════════════════════

/// The daemon's run configuration. Set once at start; the loop only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOptions {
    /// Sleep when the queue is empty.
    #[serde(with = "humantime_serde", default = "default_sleep")]
    pub sleep: Duration,
    /// Memory ceiling in MB; reaching it stops the worker (0 = unlimited).
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    /// Jobs to process before stopping (0 = unlimited).
    #[serde(default)]
    pub max_jobs: u64,
    /// Wall-clock runtime before stopping (zero = unlimited).
    #[serde(with = "humantime_serde", default = "default_max_time")]
    pub max_time: Duration,
    /// Stop as soon as the queue is empty instead of sleeping.
    #[serde(default)]
    pub stop_when_empty: bool,
    /// Log heartbeat failures and other chatter.
    #[serde(default)]
    pub verbose: bool,
    /// Collect up to this many jobs per iteration and process them as a
    /// batch. Trades latency for throughput.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            sleep: default_sleep(),
            memory_mb: default_memory_mb(),
            max_jobs: 0,
            max_time: default_max_time(),
            stop_when_empty: false,
            verbose: false,
            batch_size: None,
        }
    }
}

impl WorkerOptions {
    /// Derive options from the `workers` configuration section.
    pub fn from_workers_config(config: &WorkersConfig) -> Self {
        Self {
            sleep: Duration::from_secs(config.sleep),
            memory_mb: config.memory_limit_mb(),
            max_jobs: config.max_jobs,
            max_time: Duration::from_secs(config.max_time),
            ..Self::default()
        }
    }
}

fn default_sleep() -> Duration {
    Duration::from_secs(3)
}

fn default_memory_mb() -> u64 {
    128
}

fn default_max_time() -> Duration {
    Duration::ZERO
}

// ═══════════════════════════════════════════════════════════════════════════════
// Outcomes / Report
// ═══════════════════════════════════════════════════════════════════════════════

/// What happened to one processed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The job ran to completion.
    Success,
    /// The job failed and was released back with a backoff delay (seconds).
    Retried { delay_secs: u64 },
    /// The job was routed to the failed store.
    Failed,
}

/// Why the daemon loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// SIGTERM/SIGINT or an explicit stop request.
    Stopped,
    /// `max_jobs` reached.
    MaxJobs,
    /// Memory ceiling reached.
    MemoryLimit,
    /// `max_time` elapsed.
    MaxRuntime,
    /// Queue drained with `stop_when_empty` set.
    QueueEmpty,
}

/// Final summary returned when the daemon exits.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub processed: u64,
    pub failed: u64,
    pub runtime: Duration,
    pub reason: StopReason,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Worker
// ═══════════════════════════════════════════════════════════════════════════════

/// A queue worker: pops jobs from one connection/queue pair and executes them
/// until stopped by a signal or a resource limit.
pub struct Worker {
    id: Uuid,
    manager: Arc<QueueManager>,
    monitor: Arc<dyn WorkerMonitor>,
    options: WorkerOptions,
    stop: watch::Sender<bool>,
    jobs_since_cleanup: AtomicU64,
}

impl Worker {
    pub fn new(manager: Arc<QueueManager>, options: WorkerOptions) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            manager,
            monitor: Arc::new(NullMonitor),
            options,
            stop,
            jobs_since_cleanup: AtomicU64::new(0),
        }
    }

    /// Attach a monitoring collaborator.
    pub fn with_monitor(mut self, monitor: Arc<dyn WorkerMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cooperatively request the daemon loop to stop. The job currently
    /// executing finishes first.
    pub fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    #[cfg(unix)]
    fn install_signal_handlers(&self) -> Vec<JoinHandle<()>> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut handles = Vec::new();
        for kind in [SignalKind::terminate(), SignalKind::interrupt()] {
            match signal(kind) {
                Ok(mut stream) => {
                    let stop = self.stop.clone();
                    handles.push(tokio::spawn(async move {
                        stream.recv().await;
                        stop.send_replace(true);
                    }));
                }
                Err(e) => warn!(error = %e, "Failed to install signal handler"),
            }
        }
        handles
    }

    #[cfg(not(unix))]
    fn install_signal_handlers(&self) -> Vec<JoinHandle<()>> {
        Vec::new()
    }

    /// Run the daemon loop against `connection`/`queue` until a stop
    /// condition trips. Returns the final report; only configuration and
    /// driver-resolution errors propagate.
    pub async fn daemon(&self, connection: &str, queue: &str) -> Result<WorkerReport> {
        let signal_tasks = self.install_signal_handlers();
        let mut stop_rx = self.stop.subscribe();

        if let Err(e) = self.monitor.register_worker(WorkerRegistration {
            uuid: self.id,
            connection: connection.to_string(),
            queue: queue.to_string(),
            pid: std::process::id(),
            hostname: hostname(),
            started_at: Utc::now(),
        }) {
            warn!(worker = %self.id, error = %e, "Worker registration failed");
        }

        let driver = self.manager.connection(Some(connection)).await?;
        let handlers = self.manager.handlers();
        let started = Instant::now();
        let mut processed: u64 = 0;
        let mut failed: u64 = 0;

        info!(
            worker = %self.id,
            connection,
            queue,
            batch = ?self.options.batch_size,
            "Worker started"
        );

        let reason = loop {
            if *stop_rx.borrow() {
                break StopReason::Stopped;
            }

            // Fetch failures are treated as an empty queue, never fatal.
            let fetched = match driver.pop(queue).await {
                Ok(job) => job,
                Err(e) => {
                    warn!(worker = %self.id, queue, error = %e, "Failed to fetch job");
                    None
                }
            };

            let mut limit_hit = false;
            match fetched {
                Some(first) => {
                    let mut batch = vec![first];
                    if let Some(batch_size) = self.options.batch_size {
                        while batch.len() < batch_size {
                            match driver.pop(queue).await {
                                Ok(Some(envelope)) => batch.push(envelope),
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(worker = %self.id, queue, error = %e, "Failed to fetch job");
                                    break;
                                }
                            }
                        }
                    }

                    let batch_len = batch.len();
                    let batch_started = Instant::now();
                    for envelope in batch {
                        let mut job =
                            QueuedJob::new(envelope, Arc::clone(&driver), Arc::clone(&handlers));
                        let outcome = self.process(&mut job).await;
                        processed += 1;
                        if outcome != ProcessOutcome::Success {
                            failed += 1;
                        }
                        if self.options.max_jobs > 0 && processed >= self.options.max_jobs {
                            limit_hit = true;
                            break;
                        }
                    }
                    if batch_len > 1 {
                        debug!(
                            worker = %self.id,
                            batch = batch_len,
                            elapsed_ms = batch_started.elapsed().as_millis() as u64,
                            "Batch processed"
                        );
                    }
                }
                None => {
                    if self.options.stop_when_empty {
                        break StopReason::QueueEmpty;
                    }
                    tokio::select! {
                        _ = stop_rx.changed() => {}
                        _ = tokio::time::sleep(self.options.sleep) => {}
                    }
                }
            }

            if limit_hit {
                break StopReason::MaxJobs;
            }

            // Heartbeat failures are swallowed unless verbose.
            if let Err(e) = self.monitor.update_heartbeat(
                self.id,
                WorkerHeartbeat {
                    last_seen: Utc::now(),
                    jobs_processed: processed,
                    jobs_failed: failed,
                    memory_mb: current_memory_mb(),
                },
            ) {
                if self.options.verbose {
                    warn!(worker = %self.id, error = %e, "Heartbeat failed");
                }
            }

            if self.options.memory_mb > 0 && current_memory_mb() >= self.options.memory_mb {
                break StopReason::MemoryLimit;
            }
            if !self.options.max_time.is_zero() && started.elapsed() >= self.options.max_time {
                break StopReason::MaxRuntime;
            }
        };

        // Unregistration runs even after a mid-loop stop.
        if let Err(e) = self.monitor.unregister_worker(
            self.id,
            WorkerFinalStats {
                jobs_processed: processed,
                jobs_failed: failed,
                stopped_at: Utc::now(),
            },
        ) {
            warn!(worker = %self.id, error = %e, "Worker unregistration failed");
        }
        for task in signal_tasks {
            task.abort();
        }

        let report = WorkerReport {
            processed,
            failed,
            runtime: started.elapsed(),
            reason,
        };
        info!(
            worker = %self.id,
            processed = report.processed,
            failed = report.failed,
            reason = ?report.reason,
            "Worker stopped"
        );
        Ok(report)
    }

    /// Process one job: execute with a deadline, then route the result to
    /// success, a delayed retry, or the failed store.
    pub async fn process(&self, job: &mut dyn Job) -> ProcessOutcome {
        // A job that already exhausted its attempts is never executed again.
        if job.attempts() >= job.max_attempts() {
            let error = JobError::fatal(format!(
                "job exceeded its maximum of {} attempts",
                job.max_attempts()
            ));
            job.failed(&error).await;
            self.monitor
                .record_job_failure(job.uuid(), Duration::ZERO, &error.message);
            counter!("conveyor_jobs_failed_total").increment(1);
            warn!(job_id = %job.uuid(), job = %job.description(), "Job attempts exhausted");
            return ProcessOutcome::Failed;
        }

        let started = Instant::now();
        let memory_before = current_memory_bytes();
        self.monitor.record_job_start(job.uuid(), &job.description());

        let timeout = job.timeout();
        let fire = AssertUnwindSafe(job.fire()).catch_unwind();
        // The deadline stops applying the moment execution resolves; a late
        // expiry cannot leak into the next job.
        let result = if timeout.is_zero() {
            match fire.await {
                Ok(result) => result,
                Err(panic) => Err(JobError::panicked(panic_message(panic))),
            }
        } else {
            match tokio::time::timeout(timeout, fire).await {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => Err(JobError::panicked(panic_message(panic))),
                Err(_) => Err(JobError::timed_out(timeout)),
            }
        };
        let duration = started.elapsed();

        let outcome = match result {
            Ok(()) => {
                self.monitor.record_job_success(job.uuid(), duration);
                counter!("conveyor_jobs_processed_total").increment(1);
                info!(
                    job_id = %job.uuid(),
                    job = %job.description(),
                    duration_ms = duration.as_millis() as u64,
                    "Job processed"
                );
                ProcessOutcome::Success
            }
            Err(error) => {
                let attempts = job.attempts() + 1;
                job.set_attempts(attempts);
                self.monitor
                    .record_job_failure(job.uuid(), duration, &error.message);
                counter!("conveyor_jobs_failed_total").increment(1);

                if error.retryable && job.should_retry() && attempts < job.max_attempts() {
                    let delay_secs = calculate_retry_delay(attempts);
                    match job.release(Duration::from_secs(delay_secs)).await {
                        Ok(()) => {
                            info!(
                                job_id = %job.uuid(),
                                job = %job.description(),
                                attempts,
                                delay_secs,
                                error = %error,
                                "Job released for retry"
                            );
                            ProcessOutcome::Retried { delay_secs }
                        }
                        Err(release_error) => {
                            warn!(
                                job_id = %job.uuid(),
                                error = %release_error,
                                "Release failed, routing job to failed store"
                            );
                            job.failed(&error).await;
                            ProcessOutcome::Failed
                        }
                    }
                } else {
                    job.failed(&error).await;
                    warn!(
                        job_id = %job.uuid(),
                        job = %job.description(),
                        attempts,
                        error = %error,
                        "Job failed"
                    );
                    ProcessOutcome::Failed
                }
            }
        };

        self.memory_cleanup(memory_before);
        outcome
    }

    /// Post-job memory pass: warn on large per-job growth, clear scratch
    /// state at 80% of the ceiling or every 100 jobs, and escalate at 90%.
    fn memory_cleanup(&self, memory_before: u64) {
        const DELTA_WARN_BYTES: u64 = 5 * 1024 * 1024;

        let after = current_memory_bytes();
        if after > memory_before && after - memory_before > DELTA_WARN_BYTES {
            warn!(
                worker = %self.id,
                delta_mb = (after - memory_before) / (1024 * 1024),
                "Job leaked a large amount of memory"
            );
        }

        let count = self.jobs_since_cleanup.fetch_add(1, Ordering::Relaxed) + 1;
        let usage_mb = after / (1024 * 1024);
        let ceiling = self.options.memory_mb;
        let near_ceiling = ceiling > 0 && usage_mb * 10 >= ceiling * 8;

        if near_ceiling || count >= 100 {
            self.jobs_since_cleanup.store(0, Ordering::Relaxed);
            debug!(worker = %self.id, usage_mb, "Memory cleanup pass");
        }
        if ceiling > 0 && usage_mb * 10 >= ceiling * 9 {
            warn!(
                worker = %self.id,
                usage_mb,
                ceiling_mb = ceiling,
                "Memory usage above 90% of ceiling"
            );
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("job panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("job panicked: {message}")
    } else {
        "job panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_monotone_and_capped() {
        assert_eq!(calculate_retry_delay(1), 2);
        assert_eq!(calculate_retry_delay(5), 32);
        assert_eq!(calculate_retry_delay(8), 256);
        assert_eq!(calculate_retry_delay(9), 300);
        assert_eq!(calculate_retry_delay(20), 300);
        assert_eq!(calculate_retry_delay(u32::MAX), 300);

        let mut previous = 0;
        for attempts in 0..64 {
            let delay = calculate_retry_delay(attempts);
            assert!(delay >= previous, "delay decreased at attempts={attempts}");
            assert!(delay <= 300);
            previous = delay;
        }
    }

    #[test]
    fn test_worker_options_defaults() {
        let options = WorkerOptions::default();
        assert_eq!(options.sleep, Duration::from_secs(3));
        assert_eq!(options.memory_mb, 128);
        assert_eq!(options.max_jobs, 0);
        assert!(!options.stop_when_empty);
        assert!(options.batch_size.is_none());
    }

    #[test]
    fn test_worker_options_from_config() {
        let config = WorkersConfig {
            sleep: 1,
            max_jobs: 50,
            max_time: 600,
            memory_limit: "256M".to_string(),
            ..WorkersConfig::default()
        };
        let options = WorkerOptions::from_workers_config(&config);
        assert_eq!(options.sleep, Duration::from_secs(1));
        assert_eq!(options.max_jobs, 50);
        assert_eq!(options.max_time, Duration::from_secs(600));
        assert_eq!(options.memory_mb, 256);
    }
}
