//! User-supplied plugin types.
//!
//! A `*.plugin.toml` file in the config directory declares a new section key
//! backed by an existing plugin type, with default settings applied beneath
//! whatever the section itself sets:
//!
//! ```toml
//! key = "notepad"
//! base = "os"
//!
//! [defaults]
//! cmd = "notepad.exe"
//! kill = "notepad.exe"
//! ```

use std::any::Any;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::registry::PluginRegistryError;
use super::{LifecycleContext, Plugin};
use crate::config::source::read_table;

/// File suffix identifying plugin manifests.
pub const MANIFEST_SUFFIX: &str = ".plugin.toml";

/// Declaration of a user plugin type.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    /// Section key the new type answers to.
    pub key: String,
    /// Registered plugin type doing the work.
    pub base: String,
    /// Settings applied under the section's own fields.
    #[serde(default)]
    pub defaults: Map<String, Value>,
}

impl PluginManifest {
    /// Read a manifest file.
    pub fn load(path: &Path) -> Result<Self, PluginRegistryError> {
        let invalid = |reason: String| PluginRegistryError::InvalidManifest {
            path: path.to_path_buf(),
            reason,
        };

        let table = read_table(path).map_err(|e| invalid(e.to_string()))?;
        let manifest: Self =
            serde_json::from_value(Value::Object(table)).map_err(|e| invalid(e.to_string()))?;

        if manifest.key.trim().is_empty() {
            return Err(invalid("key cannot be empty".to_string()));
        }
        Ok(manifest)
    }

    /// Find and load every manifest in `dir`, ordered by file name.
    ///
    /// A missing directory yields no manifests.
    pub fn discover(dir: &Path) -> Result<Vec<Self>, PluginRegistryError> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(dir).map_err(|e| PluginRegistryError::InvalidManifest {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(MANIFEST_SUFFIX))
            })
            .collect();
        paths.sort();

        paths.iter().map(|path| Self::load(path)).collect()
    }
}

/// Plugin created from a manifest: the base plugin with defaults applied.
pub(crate) struct ManifestPlugin {
    inner: Box<dyn Plugin>,
    defaults: Map<String, Value>,
}

impl ManifestPlugin {
    pub(crate) fn new(inner: Box<dyn Plugin>, defaults: Map<String, Value>) -> Self {
        Self { inner, defaults }
    }
}

#[async_trait]
impl Plugin for ManifestPlugin {
    fn parse_config(&mut self, section: &Value) -> anyhow::Result<()> {
        let mut merged = self.defaults.clone();
        match section {
            Value::Object(fields) => {
                for (key, value) in fields {
                    merged.insert(key.clone(), value.clone());
                }
            }
            Value::Null => {}
            other => anyhow::bail!("section must be a table, got {other}"),
        }
        self.inner.parse_config(&Value::Object(merged))
    }

    async fn validate(&mut self, ctx: &LifecycleContext<'_>) -> bool {
        self.inner.validate(ctx).await
    }

    async fn start(&mut self, ctx: &LifecycleContext<'_>) -> anyhow::Result<()> {
        self.inner.start(ctx).await
    }

    async fn poll_stop(&mut self, ctx: &LifecycleContext<'_>) -> anyhow::Result<bool> {
        self.inner.poll_stop(ctx).await
    }

    async fn stop(&mut self, ctx: &LifecycleContext<'_>) -> anyhow::Result<()> {
        self.inner.stop(ctx).await
    }

    // Siblings downcast to the base type.
    fn as_any(&self) -> &dyn Any {
        self.inner.as_any()
    }
}
