//! Driver discovery without manual wiring into the registry.
//!
//! Driver packages announce themselves by registering a [`DriverProvider`]
//! under a source scope at init time — an explicit list, not a filesystem
//! scan. `discover()` walks the registered providers, validates each one, and
//! silently excludes bad candidates with a logged warning: discovery never
//! fails wholesale because one provider is broken.
//!
//! The search-path list is bookkeeping for the plugin manifest loader, which
//! reads declarative descriptors from the same extension/vendor locations.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::registry::{ConfigCheck, DriverFactory, DriverRegistry};
use super::DriverInfo;

// ═══════════════════════════════════════════════════════════════════════════════
// Source Scope
// ═══════════════════════════════════════════════════════════════════════════════

/// Where a driver registration came from. Mirrors the four locations drivers
/// historically lived in: the core crate, extensions, vendored packages, and
/// the application itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceScope {
    Core,
    Extension,
    Vendor,
    App,
}

impl fmt::Display for SourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::Extension => write!(f, "extension"),
            Self::Vendor => write!(f, "vendor"),
            Self::App => write!(f, "app"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Provider / Record
// ═══════════════════════════════════════════════════════════════════════════════

/// A driver package's self-registration: everything discovery needs without
/// instantiating anything.
pub struct DriverProvider {
    /// Driver name the provider registers under.
    pub name: String,
    /// Which source scope registered it.
    pub scope: SourceScope,
    /// Factory building a configured instance.
    pub factory: DriverFactory,
    /// Static descriptor.
    pub info: DriverInfo,
    /// Optional configuration validator.
    pub check: Option<ConfigCheck>,
    /// Whether the factory needs non-empty configuration to produce a
    /// working instance.
    pub requires_config: bool,
}

/// Discovery result for one driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverRecord {
    pub name: String,
    pub scope: SourceScope,
    pub info: DriverInfo,
    pub requires_config: bool,
}

/// Outcome of validating a single discovered driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Discovery
// ═══════════════════════════════════════════════════════════════════════════════

/// Collects driver providers and turns them into validated registry entries.
#[derive(Default)]
pub struct DriverDiscovery {
    providers: RwLock<Vec<DriverProvider>>,
    search_paths: RwLock<Vec<PathBuf>>,
    /// Host capability names used to satisfy driver dependency declarations.
    capabilities: RwLock<Vec<String>>,
}

impl DriverDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver provider. Later registrations under the same name
    /// shadow earlier ones in discovery results.
    pub fn register_provider(&self, provider: DriverProvider) {
        debug!(driver = %provider.name, scope = %provider.scope, "Driver provider registered");
        self.providers.write().push(provider);
    }

    /// Declare a host capability (e.g. "redis", "tls") that drivers may list
    /// as a dependency.
    pub fn declare_capability(&self, name: impl Into<String>) {
        self.capabilities.write().push(name.into());
    }

    /// Add a path for the plugin manifest loader to scan.
    pub fn add_search_path(&self, path: impl Into<PathBuf>) {
        self.search_paths.write().push(path.into());
    }

    /// The registered search paths.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.search_paths.read().clone()
    }

    /// Walk registered providers and return the valid ones, keyed by name.
    ///
    /// A provider with validation errors is excluded from the result with a
    /// logged warning; discovery only fails for nothing — a broken provider
    /// must not hide the rest.
    pub fn discover(&self) -> BTreeMap<String, DriverRecord> {
        let providers = self.providers.read();
        let mut records = BTreeMap::new();

        for provider in providers.iter() {
            let record = DriverRecord {
                name: provider.name.clone(),
                scope: provider.scope,
                info: provider.info.clone(),
                requires_config: provider.requires_config,
            };
            let validation = self.validate_driver(&record);
            if !validation.valid {
                warn!(
                    driver = %provider.name,
                    scope = %provider.scope,
                    errors = ?validation.errors,
                    "Excluding driver from discovery"
                );
                continue;
            }
            for warning in &validation.warnings {
                warn!(driver = %provider.name, warning = %warning, "Driver discovery warning");
            }
            records.insert(provider.name.clone(), record);
        }

        debug!(count = records.len(), "Driver discovery complete");
        records
    }

    /// Validate a discovered driver:
    ///
    /// - info completeness: a name is required, a version is recommended;
    /// - dependency satisfaction against declared host capabilities;
    /// - a configuration-requiring factory is flagged as a warning, since
    ///   instantiation will need explicit configuration.
    pub fn validate_driver(&self, record: &DriverRecord) -> DriverValidation {
        let mut validation = DriverValidation::default();

        if record.name.is_empty() || record.info.name.is_empty() {
            validation.errors.push("driver name is required".to_string());
        } else if record.name != record.info.name {
            validation.errors.push(format!(
                "registration name '{}' does not match descriptor name '{}'",
                record.name, record.info.name
            ));
        }
        if record.info.version.is_empty() {
            validation
                .warnings
                .push(format!("driver '{}' declares no version", record.name));
        }

        let capabilities = self.capabilities.read();
        for missing in record.info.missing_dependencies(&capabilities) {
            validation.errors.push(format!(
                "driver '{}' requires unavailable dependency '{}'",
                record.name, missing
            ));
        }

        if record.requires_config {
            validation.warnings.push(format!(
                "driver '{}' requires explicit configuration to be instantiated",
                record.name
            ));
        }

        validation.valid = validation.errors.is_empty();
        validation
    }

    /// Register every valid discovered driver into `registry`. Providers
    /// shadowed by a later registration of the same name resolve to the
    /// later provider's factory.
    pub fn register_into(&self, registry: &DriverRegistry) {
        let discovered = self.discover();
        let providers = self.providers.read();
        for record in discovered.values() {
            // Last provider with this name wins, matching discover() shadowing.
            if let Some(provider) = providers.iter().rev().find(|p| p.name == record.name) {
                registry.register_driver_with_check(
                    provider.name.clone(),
                    provider.factory.clone(),
                    provider.info.clone(),
                    provider.check.clone(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{Driver, MemoryDriver};
    use std::sync::Arc;

    fn provider(name: &str, info: DriverInfo, requires_config: bool) -> DriverProvider {
        DriverProvider {
            name: name.to_string(),
            scope: SourceScope::Extension,
            factory: Arc::new(|c| Ok(Arc::new(MemoryDriver::from_config(c)) as Arc<dyn Driver>)),
            info,
            check: None,
            requires_config,
        }
    }

    #[test]
    fn test_discover_includes_valid_providers() {
        let discovery = DriverDiscovery::new();
        discovery.register_provider(provider(
            "custom",
            DriverInfo::new("custom").with_version("1.0.0"),
            false,
        ));

        let records = discovery.discover();
        assert_eq!(records.len(), 1);
        assert_eq!(records["custom"].scope, SourceScope::Extension);
    }

    #[test]
    fn test_discover_excludes_nameless_provider() {
        let discovery = DriverDiscovery::new();
        discovery.register_provider(provider("", DriverInfo::new(""), false));
        discovery.register_provider(provider(
            "good",
            DriverInfo::new("good").with_version("1.0.0"),
            false,
        ));

        let records = discovery.discover();
        assert_eq!(records.len(), 1);
        assert!(records.contains_key("good"));
    }

    #[test]
    fn test_validate_driver_version_recommended() {
        let discovery = DriverDiscovery::new();
        let record = DriverRecord {
            name: "nover".to_string(),
            scope: SourceScope::Vendor,
            info: DriverInfo::new("nover"),
            requires_config: false,
        };

        let validation = discovery.validate_driver(&record);
        assert!(validation.valid);
        assert_eq!(validation.warnings.len(), 1);
        assert!(validation.warnings[0].contains("version"));
    }

    #[test]
    fn test_validate_driver_dependency_satisfaction() {
        let discovery = DriverDiscovery::new();
        let record = DriverRecord {
            name: "needy".to_string(),
            scope: SourceScope::Vendor,
            info: DriverInfo::new("needy")
                .with_version("0.1.0")
                .with_dependencies(["tls"]),
            requires_config: false,
        };

        let validation = discovery.validate_driver(&record);
        assert!(!validation.valid);
        assert!(validation.errors[0].contains("tls"));

        discovery.declare_capability("tls");
        assert!(discovery.validate_driver(&record).valid);
    }

    #[test]
    fn test_requires_config_flagged() {
        let discovery = DriverDiscovery::new();
        discovery.register_provider(provider(
            "configurable",
            DriverInfo::new("configurable").with_version("1.0.0"),
            true,
        ));

        let records = discovery.discover();
        let validation = discovery.validate_driver(&records["configurable"]);
        assert!(validation.valid);
        assert!(validation.warnings.iter().any(|w| w.contains("explicit configuration")));
    }

    #[test]
    fn test_register_into_registry() {
        let discovery = DriverDiscovery::new();
        discovery.register_provider(provider(
            "custom",
            DriverInfo::new("custom").with_version("1.0.0"),
            false,
        ));

        let registry = DriverRegistry::new();
        discovery.register_into(&registry);
        assert!(registry.has_driver("custom"));
    }

    #[test]
    fn test_search_paths() {
        let discovery = DriverDiscovery::new();
        discovery.add_search_path("/opt/conveyor/extensions");
        discovery.add_search_path("/opt/conveyor/vendor");
        assert_eq!(discovery.search_paths().len(), 2);
    }
}
