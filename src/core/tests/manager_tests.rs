//! Integration tests for the queue manager façade: configuration loading,
//! connection resolution, plugin hook wiring, and the push path.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

use conveyor_core::plugins::{HookBinding, Plugin, PluginManager};
use conveyor_core::prelude::*;

// ============================================================================
// Fixtures
// ============================================================================

fn builtin_registry() -> (DriverRegistry, Arc<HandlerRegistry>) {
    let registry = DriverRegistry::new();
    let handlers = Arc::new(HandlerRegistry::new());
    register_builtin_drivers(&registry, &handlers);
    (registry, handlers)
}

// ============================================================================
// Config -> Manager Pipeline
// ============================================================================

#[tokio::test]
async fn test_push_increments_size_on_database_connection() {
    let (registry, handlers) = builtin_registry();

    // Drivers are factories: back the "database" connection with the
    // in-process store so the scenario runs hermetically.
    registry.register_driver(
        "database",
        Arc::new(|config| Ok(Arc::new(MemoryDriver::from_config(config)) as Arc<dyn Driver>)),
        MemoryDriver::driver_info(),
    );

    let config: QueueConfig = serde_json::from_value(json!({
        "default": "db",
        "connections": {"db": {"driver": "database", "table": "jobs"}}
    }))
    .unwrap();
    let manager = QueueManager::new(config, registry).with_handlers(handlers);

    let before = manager.size(None, None).await.unwrap();
    let id = manager
        .push("EmailJob", json!({"to": "a@b.com"}), None, None)
        .await
        .unwrap();

    assert!(!id.to_string().is_empty());
    assert_eq!(manager.size(None, None).await.unwrap(), before + 1);
}

#[tokio::test]
async fn test_config_manager_to_queue_manager() {
    let config_manager = ConfigManager::new();
    let config = config_manager
        .load_value(
            "integration",
            json!({
                "default": "mem",
                "connections": {"mem": {"driver": "memory", "queue": "orders"}}
            }),
        )
        .unwrap();

    let (registry, handlers) = builtin_registry();
    let manager = QueueManager::new((*config).clone(), registry).with_handlers(handlers);

    manager
        .push("OrderPlaced", json!({"order": 17}), None, None)
        .await
        .unwrap();
    // The connection's configured default queue received the job.
    assert_eq!(manager.size(Some("orders"), None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_invalid_connection_config_aggregates_errors() {
    let (registry, handlers) = builtin_registry();
    let config: QueueConfig = serde_json::from_value(json!({
        "default": "cache",
        "connections": {"cache": {"driver": "redis", "port": 99999}}
    }))
    .unwrap();
    let manager = QueueManager::new(config, registry).with_handlers(handlers);

    let err = manager.connection(None).await.err().unwrap();
    let message = err.to_string();
    assert!(message.contains("cache"));
    assert!(message.contains("host"));
    assert!(message.contains("65535"));
}

// ============================================================================
// Plugin Hook Wiring
// ============================================================================

struct RecordingPlugin {
    payloads: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        "recording"
    }

    fn hooks(&self) -> Vec<HookBinding> {
        let payloads = Arc::clone(&self.payloads);
        vec![HookBinding {
            hook: "driver_created".to_string(),
            callback: Arc::new(move |data| {
                payloads.lock().push(data.clone());
                Ok(json!(null))
            }),
        }]
    }
}

#[tokio::test]
async fn test_driver_created_hook_fires_once_per_connection_build() {
    let (registry, handlers) = builtin_registry();
    let plugins = Arc::new(PluginManager::new());
    let payloads = Arc::new(Mutex::new(Vec::new()));
    plugins
        .register_plugin(Arc::new(RecordingPlugin {
            payloads: Arc::clone(&payloads),
        }))
        .unwrap();

    let config: QueueConfig = serde_json::from_value(json!({
        "default": "mem",
        "connections": {"mem": {"driver": "memory"}}
    }))
    .unwrap();
    let manager = QueueManager::new(config, registry)
        .with_handlers(handlers)
        .with_plugins(plugins);

    manager.connection(None).await.unwrap();
    manager.connection(None).await.unwrap(); // cached: no second hook

    let seen = payloads.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["driver"], json!("memory"));
    assert_eq!(seen[0]["name"], json!("mem"));
    assert!(seen[0]["config"].is_object());
}

#[tokio::test]
async fn test_plugin_driver_reachable_through_manager() {
    let registry = DriverRegistry::new();
    let handlers = Arc::new(HandlerRegistry::new());
    register_builtin_drivers(&registry, &handlers);

    struct LanesPlugin;
    impl Plugin for LanesPlugin {
        fn name(&self) -> &str {
            "lanes"
        }
        fn drivers(&self) -> Vec<conveyor_core::plugins::DriverRegistration> {
            vec![conveyor_core::plugins::DriverRegistration {
                name: "lanes".to_string(),
                factory: Arc::new(|config| {
                    Ok(Arc::new(MemoryDriver::from_config(config)) as Arc<dyn Driver>)
                }),
                info: DriverInfo::new("lanes").with_version("1.0.0"),
                check: None,
            }]
        }
    }

    let plugins = Arc::new(PluginManager::new());
    plugins.register_plugin(Arc::new(LanesPlugin)).unwrap();
    plugins.set_driver_registry(registry.clone());

    let config: QueueConfig = serde_json::from_value(json!({
        "default": "fast",
        "connections": {"fast": {"driver": "lanes"}}
    }))
    .unwrap();
    let manager = QueueManager::new(config, registry)
        .with_handlers(handlers)
        .with_plugins(plugins);

    let id = manager.push("Ping", json!({}), None, None).await.unwrap();
    assert!(!id.to_string().is_empty());
    assert_eq!(manager.size(None, None).await.unwrap(), 1);
}

// ============================================================================
// Health Probing
// ============================================================================

#[tokio::test]
async fn test_connection_health_report() {
    let (registry, handlers) = builtin_registry();
    let config: QueueConfig = serde_json::from_value(json!({
        "default": "mem",
        "connections": {"mem": {"driver": "memory"}}
    }))
    .unwrap();
    let manager = QueueManager::new(config, registry).with_handlers(handlers);

    manager.push("Seed", json!({}), None, None).await.unwrap();
    let test = manager.test_connection(None).await;

    assert!(test.healthy);
    assert_eq!(test.connection, "mem");
    assert_eq!(test.metrics["pending"], json!(1));
}
