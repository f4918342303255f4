//! The queue façade applications talk to.
//!
//! A [`QueueManager`] owns named connections — lazily built, cached driver
//! instances — and delegates push/pop-side operations to them. It adds no
//! buffering or batching of its own. Connection resolution is the one place
//! configuration errors surface loudly; everything else is a thin pass-through.
//!
//! The connection cache is scoped to this manager instance. Callers sharing a
//! manager across tasks get the same driver instance per connection name
//! until [`disconnect`](QueueManager::disconnect) or
//! [`reconnect`](QueueManager::reconnect) drops it.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::QueueConfig;
use crate::drivers::{Driver, DriverRegistry, QueueStats};
use crate::error::{QueueError, Result};
use crate::jobs::{HandlerRegistry, JobId};
use crate::plugins::PluginManager;

/// Result of probing one connection's health.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionTest {
    pub connection: String,
    pub healthy: bool,
    pub message: String,
    pub metrics: HashMap<String, Value>,
    pub response_time_ms: u64,
}

/// Owns named connections and delegates queue operations to their drivers.
pub struct QueueManager {
    config: QueueConfig,
    registry: DriverRegistry,
    plugins: Option<Arc<PluginManager>>,
    handlers: Arc<HandlerRegistry>,
    connections: RwLock<HashMap<String, Arc<dyn Driver>>>,
}

impl QueueManager {
    /// Build a manager over a configuration and driver registry.
    ///
    /// Normalizes the configuration: with no connections declared, a default
    /// database-backed connection is synthesized; with a redis driver
    /// registered and no redis connection declared, a redis connection is
    /// synthesized. Convenience defaults — nothing is instantiated until
    /// first access.
    pub fn new(config: QueueConfig, registry: DriverRegistry) -> Self {
        let config = Self::normalize(config, &registry);
        Self {
            config,
            registry,
            plugins: None,
            handlers: Arc::new(HandlerRegistry::new()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a plugin manager; the `driver_created` hook fires through it.
    pub fn with_plugins(mut self, plugins: Arc<PluginManager>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Use a shared handler registry (the same one captured by the `sync`
    /// driver factory and handed to workers).
    pub fn with_handlers(mut self, handlers: Arc<HandlerRegistry>) -> Self {
        self.handlers = handlers;
        self
    }

    fn normalize(mut config: QueueConfig, registry: &DriverRegistry) -> QueueConfig {
        if config.connections.is_empty() {
            debug!("No connections declared, synthesizing default database connection");
            config.connections.insert(
                "database".to_string(),
                json!({"driver": "database", "table": "jobs", "queue": "default"}),
            );
        }
        if config.default.is_empty() {
            config.default = if config.connections.contains_key("database") {
                "database".to_string()
            } else {
                config.connections.keys().next().cloned().unwrap_or_default()
            };
        }

        let has_redis_connection = config
            .connections
            .values()
            .any(|c| c.get("driver").and_then(Value::as_str) == Some("redis"));
        if registry.has_driver("redis")
            && !has_redis_connection
            && !config.connections.contains_key("redis")
        {
            debug!("Redis driver available, synthesizing redis connection");
            config.connections.insert(
                "redis".to_string(),
                json!({"driver": "redis", "host": "127.0.0.1", "port": 6379, "queue": "default"}),
            );
        }

        config
    }

    /// The normalized configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// The handler registry workers resolve job types through.
    pub fn handlers(&self) -> Arc<HandlerRegistry> {
        Arc::clone(&self.handlers)
    }

    /// Whether a connection is declared.
    pub fn has_connection(&self, name: &str) -> bool {
        self.config.connections.contains_key(name)
    }

    /// Declared connection names.
    pub fn connection_names(&self) -> Vec<String> {
        self.config.connections.keys().cloned().collect()
    }

    /// Resolve a connection to its driver, building and caching it on first
    /// access. One driver instance exists per connection name for this
    /// manager's lifetime.
    pub async fn connection(&self, name: Option<&str>) -> Result<Arc<dyn Driver>> {
        let name = name.unwrap_or(&self.config.default);

        if let Some(driver) = self.connections.read().await.get(name) {
            return Ok(Arc::clone(driver));
        }

        let mut connections = self.connections.write().await;
        // Double-check: another task may have built it while we waited.
        if let Some(driver) = connections.get(name) {
            return Ok(Arc::clone(driver));
        }

        let driver = self.build_connection(name)?;
        connections.insert(name.to_string(), Arc::clone(&driver));
        Ok(driver)
    }

    fn build_connection(&self, name: &str) -> Result<Arc<dyn Driver>> {
        let connection_config = self
            .config
            .connection(name)
            .ok_or_else(|| QueueError::UnknownConnection(name.to_string()))?;

        let driver_name = connection_config
            .get("driver")
            .and_then(Value::as_str)
            .ok_or_else(|| QueueError::InvalidConnection {
                connection: name.to_string(),
                errors: vec!["missing 'driver' key".to_string()],
            })?;

        let errors = self.registry.validate_config(driver_name, connection_config);
        if !errors.is_empty() {
            return Err(QueueError::InvalidConnection {
                connection: name.to_string(),
                errors,
            });
        }

        let driver = self.registry.get_driver(driver_name, connection_config)?;
        info!(connection = name, driver = driver_name, "Queue connection created");

        // Fire-and-forget: hook results are not consulted.
        if let Some(plugins) = &self.plugins {
            plugins.execute_hook(
                "driver_created",
                &json!({
                    "driver": driver_name,
                    "name": name,
                    "config": connection_config,
                }),
            );
        }

        Ok(driver)
    }

    /// Push a job for immediate processing.
    pub async fn push(
        &self,
        job_type: &str,
        payload: Value,
        queue: Option<&str>,
        connection: Option<&str>,
    ) -> Result<JobId> {
        let driver = self.connection(connection).await?;
        Ok(driver.push(job_type, payload, queue).await?)
    }

    /// Push a job available after `delay`.
    pub async fn later(
        &self,
        delay: Duration,
        job_type: &str,
        payload: Value,
        queue: Option<&str>,
        connection: Option<&str>,
    ) -> Result<JobId> {
        let driver = self.connection(connection).await?;
        Ok(driver.later(delay, job_type, payload, queue).await?)
    }

    /// Push several jobs; returns their ids in input order.
    pub async fn bulk(
        &self,
        jobs: Vec<(String, Value)>,
        queue: Option<&str>,
        connection: Option<&str>,
    ) -> Result<Vec<JobId>> {
        let driver = self.connection(connection).await?;
        Ok(driver.bulk(jobs, queue).await?)
    }

    /// Number of jobs on a queue.
    pub async fn size(&self, queue: Option<&str>, connection: Option<&str>) -> Result<u64> {
        let driver = self.connection(connection).await?;
        Ok(driver.size(queue).await?)
    }

    /// Remove all jobs from a queue; returns how many were removed.
    pub async fn purge(&self, queue: Option<&str>, connection: Option<&str>) -> Result<u64> {
        let driver = self.connection(connection).await?;
        Ok(driver.purge(queue).await?)
    }

    /// Driver statistics for a queue.
    pub async fn stats(&self, queue: Option<&str>, connection: Option<&str>) -> Result<QueueStats> {
        let driver = self.connection(connection).await?;
        Ok(driver.stats(queue).await?)
    }

    /// Probe a connection's health. Never propagates an error: resolution
    /// and probe failures are reported as an unhealthy result.
    pub async fn test_connection(&self, name: Option<&str>) -> ConnectionTest {
        let connection_name = name.unwrap_or(&self.config.default).to_string();
        let started = Instant::now();

        match self.connection(name).await {
            Ok(driver) => {
                let health = driver.health_check().await;
                ConnectionTest {
                    connection: connection_name,
                    healthy: health.healthy,
                    message: health.message,
                    metrics: health.metrics,
                    response_time_ms: health.response_time_ms,
                }
            }
            Err(e) => ConnectionTest {
                connection: connection_name,
                healthy: false,
                message: e.to_string(),
                metrics: HashMap::new(),
                response_time_ms: started.elapsed().as_millis() as u64,
            },
        }
    }

    /// Drop every cached connection; the next access rebuilds.
    pub async fn disconnect(&self) {
        self.connections.write().await.clear();
        debug!("All queue connections dropped");
    }

    /// Drop one cached connection, or all of them when `name` is `None`.
    pub async fn reconnect(&self, name: Option<&str>) {
        match name {
            Some(name) => {
                self.connections.write().await.remove(name);
                debug!(connection = name, "Queue connection dropped");
            }
            None => self.disconnect().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::drivers::registry::register_builtin_drivers;

    fn memory_config() -> QueueConfig {
        serde_json::from_value(json!({
            "default": "mem",
            "connections": {"mem": {"driver": "memory"}}
        }))
        .unwrap()
    }

    fn builtin_registry() -> (DriverRegistry, Arc<HandlerRegistry>) {
        let registry = DriverRegistry::new();
        let handlers = Arc::new(HandlerRegistry::new());
        register_builtin_drivers(&registry, &handlers);
        (registry, handlers)
    }

    #[tokio::test]
    async fn test_connection_caching() {
        let (registry, handlers) = builtin_registry();
        let manager = QueueManager::new(memory_config(), registry).with_handlers(handlers);

        let first = manager.connection(Some("mem")).await.unwrap();
        let second = manager.connection(Some("mem")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        manager.reconnect(Some("mem")).await;
        let third = manager.connection(Some("mem")).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_unknown_connection_errors() {
        let (registry, handlers) = builtin_registry();
        let manager = QueueManager::new(memory_config(), registry).with_handlers(handlers);

        let err = manager.connection(Some("nope")).await.err().unwrap();
        assert!(matches!(err, QueueError::UnknownConnection(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_missing_driver_key_errors() {
        let (registry, handlers) = builtin_registry();
        let config: QueueConfig = serde_json::from_value(json!({
            "default": "broken",
            "connections": {"broken": {"table": "jobs"}}
        }))
        .unwrap();
        let manager = QueueManager::new(config, registry).with_handlers(handlers);

        let err = manager.connection(None).await.err().unwrap();
        assert!(matches!(err, QueueError::InvalidConnection { .. }));
    }

    #[tokio::test]
    async fn test_default_connection_synthesis() {
        let (registry, handlers) = builtin_registry();
        let config: QueueConfig = serde_json::from_value(json!({
            "default": "",
            "connections": {}
        }))
        .unwrap();
        let manager = QueueManager::new(config, registry).with_handlers(handlers);

        assert!(manager.has_connection("database"));
        assert_eq!(manager.config().default, "database");
        // Redis driver is registered, so a redis connection is synthesized too.
        assert!(manager.has_connection("redis"));
    }

    #[tokio::test]
    async fn test_push_and_size_roundtrip() {
        let (registry, handlers) = builtin_registry();
        let manager = QueueManager::new(memory_config(), registry).with_handlers(handlers);

        let before = manager.size(None, None).await.unwrap();
        let id = manager
            .push("EmailJob", json!({"to": "a@b.com"}), None, None)
            .await
            .unwrap();
        assert!(!id.to_string().is_empty());
        assert_eq!(manager.size(None, None).await.unwrap(), before + 1);
    }

    #[tokio::test]
    async fn test_bulk_and_purge() {
        let (registry, handlers) = builtin_registry();
        let manager = QueueManager::new(memory_config(), registry).with_handlers(handlers);

        let ids = manager
            .bulk(
                vec![
                    ("a".to_string(), json!({})),
                    ("b".to_string(), json!({})),
                    ("c".to_string(), json!({})),
                ],
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(manager.size(None, None).await.unwrap(), 3);
        assert_eq!(manager.purge(None, None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_test_connection_never_propagates() {
        let (registry, handlers) = builtin_registry();
        let manager = QueueManager::new(memory_config(), registry).with_handlers(handlers);

        let healthy = manager.test_connection(Some("mem")).await;
        assert!(healthy.healthy);

        let unhealthy = manager.test_connection(Some("ghost")).await;
        assert!(!unhealthy.healthy);
        assert!(unhealthy.message.contains("ghost"));
    }
}
