//! Plugin manifest parsing and validation.
//!
//! A plugin directory carries a declarative descriptor (`plugin.toml` or
//! `plugin.json`) naming the plugin and what it contributes: drivers, event
//! listeners, hooks. The manifest is metadata only — executable bindings come
//! from the typed [`Plugin`](super::Plugin) trait at registration time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A dependency on another plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDependency {
    /// Name of the required plugin.
    pub name: String,
    /// Semantic version requirement (e.g. ">=1.0.0, <2.0.0").
    #[serde(default)]
    pub version_req: String,
    /// Whether this dependency is optional.
    #[serde(default)]
    pub optional: bool,
}

/// A declared event subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerDecl {
    /// Event pattern, wildcards allowed (`queue.*`).
    pub event: String,
    /// Listener priority; higher runs first.
    #[serde(default)]
    pub priority: i32,
}

/// Full manifest for a plugin, stored as `plugin.toml` or `plugin.json` at
/// the root of the plugin directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique plugin name (lowercase alphanumerics and hyphens).
    pub name: String,

    /// Semantic version string.
    #[serde(default)]
    pub version: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Author name or organisation.
    #[serde(default)]
    pub author: String,

    /// Driver names this plugin's code registers.
    #[serde(default)]
    pub drivers: Vec<String>,

    /// Event subscriptions this plugin declares.
    #[serde(default)]
    pub listeners: Vec<ListenerDecl>,

    /// Hook names this plugin binds.
    #[serde(default)]
    pub hooks: Vec<String>,

    /// Dependencies on other plugins.
    #[serde(default)]
    pub dependencies: Vec<PluginDependency>,

    /// Arbitrary metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl PluginManifest {
    /// Parse a manifest from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ManifestError> {
        toml::from_str(toml_str).map_err(|e| ManifestError::ParseError {
            format: "TOML".into(),
            details: e.to_string(),
        })
    }

    /// Parse a manifest from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json_str).map_err(|e| ManifestError::ParseError {
            format: "JSON".into(),
            details: e.to_string(),
        })
    }

    /// Load a manifest from a directory, looking for `plugin.toml` then
    /// `plugin.json`.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ManifestError> {
        let toml_path = dir.join("plugin.toml");
        if toml_path.exists() {
            let content = std::fs::read_to_string(&toml_path).map_err(|e| {
                ManifestError::IoError(format!("Failed to read {}: {}", toml_path.display(), e))
            })?;
            return Self::from_toml(&content);
        }

        let json_path = dir.join("plugin.json");
        if json_path.exists() {
            let content = std::fs::read_to_string(&json_path).map_err(|e| {
                ManifestError::IoError(format!("Failed to read {}: {}", json_path.display(), e))
            })?;
            return Self::from_json(&content);
        }

        Err(ManifestError::NotFound {
            dir: dir.display().to_string(),
        })
    }

    /// Validate the minimal shape: a plugin must have a name.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.name.is_empty() {
            return Err(ManifestError::ValidationError("name must not be empty".into()));
        }

        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ManifestError::ValidationError(
                "name must contain only lowercase alphanumeric characters and hyphens".into(),
            ));
        }

        for decl in &self.listeners {
            if decl.event.is_empty() {
                return Err(ManifestError::ValidationError(
                    "listener event pattern must not be empty".into(),
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("No plugin manifest found in {dir}")]
    NotFound { dir: String },

    #[error("Failed to parse {format} manifest: {details}")]
    ParseError { format: String, details: String },

    #[error("Manifest validation failed: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(String),
}
