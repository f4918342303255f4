//! Driver registration and resolution.
//!
//! The registry is a factory-function table: each driver package registers
//! `name -> fn(config) -> Driver` together with its [`DriverInfo`] and an
//! optional configuration validator. No runtime type introspection — if a
//! driver needs configuration, its factory takes it explicitly.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use super::{Driver, DriverError, DriverInfo};
use crate::jobs::HandlerRegistry;

/// Builds a configured driver instance from a connection's configuration.
pub type DriverFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Driver>, DriverError> + Send + Sync>;

/// Driver-declared configuration validation: returns human-readable error
/// strings, empty when the configuration is acceptable.
pub type ConfigCheck = Arc<dyn Fn(&serde_json::Value) -> Vec<String> + Send + Sync>;

struct Registration {
    factory: DriverFactory,
    info: DriverInfo,
    check: Option<ConfigCheck>,
}

/// Single source of truth for which driver implementations exist and whether
/// a given configuration is acceptable to them.
///
/// Cheap to clone; all clones share the same table. Registration is
/// last-write-wins.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    inner: Arc<RwLock<HashMap<String, Registration>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or overwrite) a driver entry.
    pub fn register_driver(&self, name: impl Into<String>, factory: DriverFactory, info: DriverInfo) {
        self.register_driver_with_check(name, factory, info, None);
    }

    /// Register a driver together with its configuration validator.
    pub fn register_driver_with_check(
        &self,
        name: impl Into<String>,
        factory: DriverFactory,
        info: DriverInfo,
        check: Option<ConfigCheck>,
    ) {
        let name = name.into();
        debug!(driver = %name, "Registering queue driver");
        self.inner
            .write()
            .insert(name, Registration { factory, info, check });
    }

    /// Whether a driver is registered under `name`.
    pub fn has_driver(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    /// Build a driver instance configured with `config`.
    pub fn get_driver(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn Driver>, DriverError> {
        let inner = self.inner.read();
        let registration = inner
            .get(name)
            .ok_or_else(|| DriverError::NotFound(name.to_string()))?;
        (registration.factory)(config)
    }

    /// Validate `config` against the driver's own declared rules.
    ///
    /// Unknown driver names and non-object configurations are themselves
    /// reported as errors; an empty list means valid.
    pub fn validate_config(&self, name: &str, config: &serde_json::Value) -> Vec<String> {
        let inner = self.inner.read();
        let Some(registration) = inner.get(name) else {
            return vec![format!("unknown driver '{name}'")];
        };
        if !config.is_object() {
            return vec![format!("configuration for driver '{name}' must be a table")];
        }
        match &registration.check {
            Some(check) => check(config),
            None => Vec::new(),
        }
    }

    /// Descriptors of every registered driver, keyed by name.
    pub fn all_driver_info(&self) -> BTreeMap<String, DriverInfo> {
        self.inner
            .read()
            .iter()
            .map(|(name, r)| (name.clone(), r.info.clone()))
            .collect()
    }

    /// Registered driver names.
    pub fn driver_names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }
}

/// Register the drivers this crate ships: `memory`, `sync`, `null`, `redis`,
/// `database`. The handler registry is captured by the `sync` factory, which
/// executes jobs inline on push.
pub fn register_builtin_drivers(registry: &DriverRegistry, handlers: &Arc<HandlerRegistry>) {
    registry.register_driver_with_check(
        "memory",
        Arc::new(|config| Ok(Arc::new(super::MemoryDriver::from_config(config)) as Arc<dyn Driver>)),
        super::MemoryDriver::driver_info(),
        None,
    );

    let sync_handlers = Arc::clone(handlers);
    registry.register_driver_with_check(
        "sync",
        Arc::new(move |config| {
            Ok(Arc::new(super::SyncDriver::from_config(config, Arc::clone(&sync_handlers)))
                as Arc<dyn Driver>)
        }),
        super::SyncDriver::driver_info(),
        None,
    );

    registry.register_driver_with_check(
        "null",
        Arc::new(|_config| Ok(Arc::new(super::NullDriver::new()) as Arc<dyn Driver>)),
        super::NullDriver::driver_info(),
        None,
    );

    registry.register_driver_with_check(
        "redis",
        Arc::new(|config| {
            super::RedisDriver::from_config(config).map(|d| Arc::new(d) as Arc<dyn Driver>)
        }),
        super::RedisDriver::driver_info(),
        Some(Arc::new(super::redis::validate_config)),
    );

    registry.register_driver_with_check(
        "database",
        Arc::new(|config| {
            super::DatabaseDriver::from_config(config).map(|d| Arc::new(d) as Arc<dyn Driver>)
        }),
        super::DatabaseDriver::driver_info(),
        Some(Arc::new(super::database::validate_config)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_lookup() {
        let registry = DriverRegistry::new();
        let handlers = Arc::new(HandlerRegistry::new());
        register_builtin_drivers(&registry, &handlers);

        assert!(registry.has_driver("memory"));
        assert!(registry.has_driver("null"));
        assert!(registry.has_driver("sync"));
        assert!(registry.has_driver("redis"));
        assert!(registry.has_driver("database"));
        assert!(!registry.has_driver("kafka"));
    }

    #[test]
    fn test_get_driver_not_found() {
        let registry = DriverRegistry::new();
        let err = registry.get_driver("kafka", &json!({})).err().unwrap();
        assert!(matches!(err, DriverError::NotFound(name) if name == "kafka"));
    }

    #[test]
    fn test_validate_config_unknown_driver() {
        let registry = DriverRegistry::new();
        let errors = registry.validate_config("kafka", &json!({}));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unknown driver"));
    }

    #[test]
    fn test_validate_config_delegates_to_driver() {
        let registry = DriverRegistry::new();
        let handlers = Arc::new(HandlerRegistry::new());
        register_builtin_drivers(&registry, &handlers);

        // database driver requires a table
        let errors = registry.validate_config("database", &json!({"driver": "database"}));
        assert!(errors.iter().any(|e| e.contains("table")));

        let errors = registry.validate_config(
            "database",
            &json!({"driver": "database", "table": "jobs", "url": "postgres://localhost/q"}),
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let registry = DriverRegistry::new();
        registry.register_driver(
            "memory",
            Arc::new(|c| Ok(Arc::new(super::super::MemoryDriver::from_config(c)) as Arc<dyn Driver>)),
            DriverInfo::new("memory").with_version("0.1.0"),
        );
        registry.register_driver(
            "memory",
            Arc::new(|c| Ok(Arc::new(super::super::MemoryDriver::from_config(c)) as Arc<dyn Driver>)),
            DriverInfo::new("memory").with_version("0.2.0"),
        );

        let info = registry.all_driver_info();
        assert_eq!(info["memory"].version, "0.2.0");
    }
}
