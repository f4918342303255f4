//! Plugin system: extensibility without modifying core code.
//!
//! A plugin is a typed [`Plugin`] implementation contributing driver
//! registrations, event listeners, lifecycle hooks, and a one-time `init`
//! callback. Registration is programmatic — a plugin package calls
//! [`PluginManager::register_plugin`] at startup. Declarative manifests
//! (`plugin.toml`/`plugin.json`) can additionally be loaded from
//! extension/vendor search paths as metadata-only entries.
//!
//! Hooks are synchronous, in-process, and best-effort: they must never
//! destabilize the queue pipeline. Isolation is per-plugin exception and
//! panic containment, not sandboxing. Hook execution order is plugin
//! registration order; unlike event listeners, hooks carry no priority.

pub mod events;
pub mod manifest;

pub use events::{EventDispatcher, ListenerFn};
pub use manifest::{ListenerDecl, ManifestError, PluginDependency, PluginManifest};

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::drivers::registry::{ConfigCheck, DriverFactory, DriverRegistry};
use crate::drivers::DriverInfo;

// ═══════════════════════════════════════════════════════════════════════════════
// Plugin Contributions
// ═══════════════════════════════════════════════════════════════════════════════

/// Hook callback: receives the hook payload, returns a result value collected
/// by [`PluginManager::execute_hook`].
pub type HookFn =
    Arc<dyn Fn(&serde_json::Value) -> Result<serde_json::Value, PluginError> + Send + Sync>;

/// A named extension point a plugin binds to.
pub struct HookBinding {
    pub hook: String,
    pub callback: HookFn,
}

/// An event subscription a plugin contributes.
pub struct ListenerSpec {
    /// Event pattern, wildcards allowed (`queue.*`).
    pub event: String,
    /// Higher priority runs first.
    pub priority: i32,
    pub callback: ListenerFn,
}

/// A driver a plugin contributes to the [`DriverRegistry`].
pub struct DriverRegistration {
    pub name: String,
    pub factory: DriverFactory,
    pub info: DriverInfo,
    pub check: Option<ConfigCheck>,
}

/// The interface every plugin implements.
pub trait Plugin: Send + Sync {
    /// Unique plugin name. Registration under an existing name overwrites.
    fn name(&self) -> &str;

    /// Plugin version string.
    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Drivers this plugin registers.
    fn drivers(&self) -> Vec<DriverRegistration> {
        Vec::new()
    }

    /// Event listeners this plugin binds.
    fn listeners(&self) -> Vec<ListenerSpec> {
        Vec::new()
    }

    /// Lifecycle hooks this plugin binds.
    fn hooks(&self) -> Vec<HookBinding> {
        Vec::new()
    }

    /// Called once at load time. A failure is logged and recorded but does
    /// not unload the plugin or affect other plugins.
    fn init(&self, _manager: &PluginManager) -> Result<(), PluginError> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Plugin Errors / State
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("invalid plugin: {0}")]
    InvalidDescriptor(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("plugin initialization failed: {0}")]
    Init(String),

    #[error("hook '{hook}' failed in plugin '{plugin}': {message}")]
    Hook {
        plugin: String,
        hook: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Load state of a plugin inside the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginState {
    /// Fully loaded, `init` succeeded (or was absent).
    Loaded,
    /// Registered, but `init` failed; bindings remain active.
    Error(String),
}

/// Queryable descriptor of a loaded plugin.
#[derive(Debug, Clone)]
pub struct PluginRecord {
    pub name: String,
    pub version: String,
    pub state: PluginState,
    pub hook_names: Vec<String>,
    pub driver_names: Vec<String>,
    /// True when the entry came from a manifest file rather than code.
    pub from_manifest: bool,
}

struct LoadedPlugin {
    name: String,
    version: String,
    state: PluginState,
    hooks: Vec<HookBinding>,
    drivers: Vec<DriverRegistration>,
    from_manifest: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Plugin Manager
// ═══════════════════════════════════════════════════════════════════════════════

/// Loads plugins, wires their contributions, and executes hooks.
#[derive(Default)]
pub struct PluginManager {
    /// Registration order matters: hooks execute in it.
    plugins: RwLock<Vec<LoadedPlugin>>,
    events: EventDispatcher,
    registry: RwLock<Option<DriverRegistry>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manager and immediately scan `paths` (extension and vendor
    /// plugin locations) for declarative manifests.
    pub fn with_search_paths(paths: &[PathBuf]) -> Self {
        let manager = Self::new();
        let loaded = manager.load_from_search_paths(paths);
        debug!(count = loaded, "Plugins loaded from search paths");
        manager
    }

    /// Register a plugin: bind its listeners, register its drivers, run its
    /// `init`. An `init` failure is contained — the plugin stays registered
    /// in the [`PluginState::Error`] state and later plugins are unaffected.
    ///
    /// Returns an error only for structural problems (an empty name).
    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let name = plugin.name().to_string();
        if name.is_empty() {
            return Err(PluginError::InvalidDescriptor(
                "plugin must have a name".to_string(),
            ));
        }

        let drivers = plugin.drivers();
        for spec in plugin.listeners() {
            self.events.listen(spec.event, spec.priority, spec.callback);
        }
        if let Some(registry) = self.registry.read().as_ref() {
            for driver in &drivers {
                registry.register_driver_with_check(
                    driver.name.clone(),
                    driver.factory.clone(),
                    driver.info.clone(),
                    driver.check.clone(),
                );
            }
        }

        let state = match catch_unwind(AssertUnwindSafe(|| plugin.init(self))) {
            Ok(Ok(())) => PluginState::Loaded,
            Ok(Err(e)) => {
                warn!(plugin = %name, error = %e, "Plugin init failed");
                PluginState::Error(e.to_string())
            }
            Err(_) => {
                warn!(plugin = %name, "Plugin init panicked");
                PluginState::Error("init panicked".to_string())
            }
        };

        let loaded = LoadedPlugin {
            name: name.clone(),
            version: plugin.version().to_string(),
            state,
            hooks: plugin.hooks(),
            drivers,
            from_manifest: false,
        };

        let mut plugins = self.plugins.write();
        // Duplicate names overwrite, keeping the original position.
        match plugins.iter_mut().find(|p| p.name == name) {
            Some(existing) => *existing = loaded,
            None => plugins.push(loaded),
        }
        info!(plugin = %name, "Plugin registered");
        Ok(())
    }

    /// Load a metadata-only plugin from a manifest directory.
    pub fn load_plugin_dir(&self, dir: &std::path::Path) -> Result<String, PluginError> {
        let manifest = PluginManifest::load_from_dir(dir)?;
        manifest.validate()?;

        let loaded = LoadedPlugin {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            state: PluginState::Loaded,
            hooks: Vec::new(),
            drivers: Vec::new(),
            from_manifest: true,
        };

        let name = manifest.name;
        let mut plugins = self.plugins.write();
        match plugins.iter_mut().find(|p| p.name == name) {
            Some(existing) => *existing = loaded,
            None => plugins.push(loaded),
        }
        debug!(plugin = %name, dir = %dir.display(), "Manifest plugin loaded");
        Ok(name)
    }

    /// Scan search paths for plugin manifest directories. A broken manifest
    /// is logged and skipped; it never prevents other plugins from loading.
    /// Returns how many plugins were loaded.
    pub fn load_from_search_paths(&self, paths: &[PathBuf]) -> usize {
        let mut loaded = 0;
        for base in paths {
            let entries = match std::fs::read_dir(base) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(path = %base.display(), error = %e, "Skipping unreadable search path");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let dir = entry.path();
                if !dir.is_dir() {
                    continue;
                }
                match self.load_plugin_dir(&dir) {
                    Ok(_) => loaded += 1,
                    Err(PluginError::Manifest(ManifestError::NotFound { .. })) => {
                        debug!(dir = %dir.display(), "No plugin manifest, skipping");
                    }
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "Failed to load plugin");
                    }
                }
            }
        }
        loaded
    }

    /// Execute every callback bound to `hook`, in plugin-registration order,
    /// collecting the results of the ones that succeed. A callback that
    /// errors or panics is logged and contributes nothing; remaining hooks
    /// still run.
    pub fn execute_hook(&self, hook: &str, data: &serde_json::Value) -> Vec<serde_json::Value> {
        let plugins = self.plugins.read();
        let mut results = Vec::new();

        for plugin in plugins.iter() {
            for binding in plugin.hooks.iter().filter(|b| b.hook == hook) {
                match catch_unwind(AssertUnwindSafe(|| (binding.callback)(data))) {
                    Ok(Ok(value)) => results.push(value),
                    Ok(Err(e)) => {
                        warn!(plugin = %plugin.name, hook, error = %e, "Hook failed");
                    }
                    Err(_) => {
                        warn!(plugin = %plugin.name, hook, "Hook panicked");
                    }
                }
            }
        }
        results
    }

    /// Dispatch an event to plugin listeners.
    pub fn dispatch_event(&self, event: &str, data: &serde_json::Value) {
        self.events.dispatch(event, data);
    }

    /// Attach a driver registry, retroactively registering the drivers of
    /// every already-loaded plugin.
    pub fn set_driver_registry(&self, registry: DriverRegistry) {
        {
            let plugins = self.plugins.read();
            for plugin in plugins.iter() {
                for driver in &plugin.drivers {
                    registry.register_driver_with_check(
                        driver.name.clone(),
                        driver.factory.clone(),
                        driver.info.clone(),
                        driver.check.clone(),
                    );
                }
            }
        }
        *self.registry.write() = Some(registry);
    }

    /// Descriptors of every loaded plugin, in registration order.
    pub fn get_plugins(&self) -> Vec<PluginRecord> {
        self.plugins
            .read()
            .iter()
            .map(|p| PluginRecord {
                name: p.name.clone(),
                version: p.version.clone(),
                state: p.state.clone(),
                hook_names: p.hooks.iter().map(|h| h.hook.clone()).collect(),
                driver_names: p.drivers.iter().map(|d| d.name.clone()).collect(),
                from_manifest: p.from_manifest,
            })
            .collect()
    }

    /// Whether a plugin is loaded under `name`.
    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.read().iter().any(|p| p.name == name)
    }
}
