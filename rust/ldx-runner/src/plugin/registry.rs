//! Plugin type registration.
//!
//! Maps a configuration section key to a factory producing a fresh plugin.
//! The registry is filled once during startup (built-ins first, then user
//! manifests) and shared immutably afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use super::builtin::{LifetimePlugin, OsPlugin};
use super::manifest::{ManifestPlugin, PluginManifest};
use super::Plugin;

/// Factory producing a fresh plugin for one run.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Plugin registration errors.
#[derive(Debug, Error)]
pub enum PluginRegistryError {
    /// A factory is already bound to this key.
    #[error("plugin key '{0}' is already registered")]
    DuplicateKey(String),

    /// No factory is bound to this key.
    #[error("no plugin registered for section '{0}'")]
    UnknownPlugin(String),

    /// A plugin manifest could not be read or is malformed.
    #[error("invalid plugin manifest {}: {reason}", path.display())]
    InvalidManifest {
        /// Manifest file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },
}

/// Registry of plugin factories keyed by section name.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.keys())
            .finish()
    }
}

impl PluginRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the built-in plugins.
    pub fn with_builtins() -> Result<Self, PluginRegistryError> {
        let mut registry = Self::new();
        registry.register("lifetime", || Box::new(LifetimePlugin::default()))?;
        registry.register("os", || Box::new(OsPlugin::default()))?;
        Ok(registry)
    }

    /// Bind `env_key` to a plugin factory.
    ///
    /// # Errors
    ///
    /// Returns [`PluginRegistryError::DuplicateKey`] if the key is taken.
    pub fn register<F>(&mut self, env_key: impl Into<String>, factory: F) -> Result<(), PluginRegistryError>
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        let env_key = env_key.into();
        if self.factories.contains_key(&env_key) {
            return Err(PluginRegistryError::DuplicateKey(env_key));
        }

        tracing::debug!(env_key = %env_key, "Registered plugin type");
        self.factories.insert(env_key, Arc::new(factory));
        Ok(())
    }

    /// Register a user plugin type described by a manifest.
    ///
    /// The manifest's `base` must already be registered.
    pub fn register_manifest(&mut self, manifest: PluginManifest) -> Result<(), PluginRegistryError> {
        let base = self
            .factories
            .get(&manifest.base)
            .cloned()
            .ok_or_else(|| PluginRegistryError::UnknownPlugin(manifest.base.clone()))?;

        let defaults = manifest.defaults;
        self.register(manifest.key, move || {
            Box::new(ManifestPlugin::new(base(), defaults.clone()))
        })
    }

    /// Load every `*.plugin.toml` manifest in `dir`.
    ///
    /// Returns the number of plugin types registered.
    pub fn load_manifests(&mut self, dir: &Path) -> Result<usize, PluginRegistryError> {
        let manifests = PluginManifest::discover(dir)?;
        let count = manifests.len();
        for manifest in manifests {
            tracing::info!(
                env_key = %manifest.key,
                base = %manifest.base,
                "Loading user plugin type"
            );
            self.register_manifest(manifest)?;
        }
        Ok(count)
    }

    /// Instantiate a fresh plugin for `env_key`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginRegistryError::UnknownPlugin`] if no factory is bound.
    pub fn create(&self, env_key: &str) -> Result<Box<dyn Plugin>, PluginRegistryError> {
        let factory = self
            .factories
            .get(env_key)
            .ok_or_else(|| PluginRegistryError::UnknownPlugin(env_key.to_string()))?;
        Ok(factory())
    }

    /// Check if a plugin type is registered.
    #[must_use]
    pub fn contains(&self, env_key: &str) -> bool {
        self.factories.contains_key(env_key)
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.factories.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of registered plugin types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether no plugin types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = PluginRegistry::with_builtins().unwrap();
        assert_eq!(registry.keys(), vec!["lifetime", "os"]);
        assert!(registry.create("lifetime").is_ok());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut registry = PluginRegistry::with_builtins().unwrap();
        let err = registry
            .register("os", || Box::new(OsPlugin::default()))
            .unwrap_err();
        assert!(matches!(err, PluginRegistryError::DuplicateKey(key) if key == "os"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unknown_plugin() {
        let registry = PluginRegistry::new();
        assert!(registry.is_empty());
        let err = registry.create("ld").err().unwrap();
        assert_eq!(err.to_string(), "no plugin registered for section 'ld'");
    }

    #[test]
    fn test_manifest_requires_known_base() {
        let mut registry = PluginRegistry::with_builtins().unwrap();
        let manifest = PluginManifest {
            key: "notepad".to_string(),
            base: "missing".to_string(),
            defaults: serde_json::Map::new(),
        };
        assert!(matches!(
            registry.register_manifest(manifest),
            Err(PluginRegistryError::UnknownPlugin(base)) if base == "missing"
        ));
        assert!(!registry.contains("notepad"));
    }

    #[test]
    fn test_manifest_registers_alias() {
        let mut registry = PluginRegistry::with_builtins().unwrap();
        let mut defaults = serde_json::Map::new();
        defaults.insert("cmd".to_string(), serde_json::json!("echo hi"));
        registry
            .register_manifest(PluginManifest {
                key: "greeter".to_string(),
                base: "os".to_string(),
                defaults,
            })
            .unwrap();

        let mut plugin = registry.create("greeter").unwrap();
        plugin.parse_config(&serde_json::json!({})).unwrap();
        assert!(plugin.as_any().downcast_ref::<OsPlugin>().is_some());
    }
}
