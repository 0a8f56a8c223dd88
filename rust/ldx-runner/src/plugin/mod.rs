//! Plugin capability contract.
//!
//! A plugin is one unit of automation behaviour. The engine drives every plugin
//! of a run through the same steps (parse-config, validate, start, poll-stop,
//! stop); a plugin overrides the ones it cares about.
//!
//! Plugins coordinate through [`Siblings`], a read-only lookup of the other
//! plugins in the same run keyed by section name. A plugin that accepts work
//! from its siblings exposes it through interior mutability (see
//! [`builtin::KillList`]); siblings are never handed out mutably.

pub mod builtin;
pub mod manifest;
pub mod registry;

pub use builtin::{KillList, LifetimePlugin, OsPlugin};
pub use manifest::PluginManifest;
pub use registry::{PluginFactory, PluginRegistry, PluginRegistryError};

use std::any::Any;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ResolvedConfig;

/// Lifecycle step names, used in logs and runtime errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStep {
    /// Reading the plugin's own config section.
    ParseConfig,
    /// Pre-run gate.
    Validate,
    /// Startup side effects.
    Start,
    /// Stop-condition check.
    PollStop,
    /// Cleanup.
    Stop,
}

impl PluginStep {
    /// Step name as used in logs and error payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ParseConfig => "parse_config",
            Self::Validate => "validate",
            Self::Start => "start",
            Self::PollStop => "poll_stop",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for PluginStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for automation plugins.
///
/// `parse_config` receives the plugin's own section. Every later step gets a
/// [`LifecycleContext`] with the full resolved configuration and the sibling
/// lookup.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Parse this plugin's configuration section.
    fn parse_config(&mut self, section: &serde_json::Value) -> anyhow::Result<()>;

    /// Pre-run check. Returning `false` aborts the whole run before any
    /// plugin is started.
    async fn validate(&mut self, _ctx: &LifecycleContext<'_>) -> bool {
        true
    }

    /// Start the plugin's work.
    async fn start(&mut self, _ctx: &LifecycleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Return `true` to end the run.
    async fn poll_stop(&mut self, _ctx: &LifecycleContext<'_>) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Undo whatever `start` did.
    async fn stop(&mut self, _ctx: &LifecycleContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Downcast hook for sibling lookups.
    fn as_any(&self) -> &dyn Any;
}

/// A plugin bound to the config section that created it.
pub struct PluginSlot {
    /// Section key the plugin was created for.
    pub env_key: String,
    /// The plugin itself.
    pub plugin: Box<dyn Plugin>,
}

impl fmt::Debug for PluginSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSlot")
            .field("env_key", &self.env_key)
            .finish_non_exhaustive()
    }
}

impl PluginSlot {
    /// Bind a plugin to its section key.
    #[must_use]
    pub fn new(env_key: impl Into<String>, plugin: Box<dyn Plugin>) -> Self {
        Self {
            env_key: env_key.into(),
            plugin,
        }
    }
}

/// Read-only view of the other plugins in the same run.
#[derive(Clone, Copy)]
pub struct Siblings<'a> {
    before: &'a [PluginSlot],
    after: &'a [PluginSlot],
}

impl fmt::Debug for Siblings<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

impl<'a> Siblings<'a> {
    /// Build a view from the slots on either side of the current plugin.
    #[must_use]
    pub fn new(before: &'a [PluginSlot], after: &'a [PluginSlot]) -> Self {
        Self { before, after }
    }

    /// A view with no siblings.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            before: &[],
            after: &[],
        }
    }

    fn iter(self) -> impl Iterator<Item = &'a PluginSlot> {
        self.before.iter().chain(self.after)
    }

    /// Look up a sibling by section key.
    #[must_use]
    pub fn get(&self, env_key: &str) -> Option<&'a dyn Plugin> {
        self.iter()
            .find(|slot| slot.env_key == env_key)
            .map(|slot| slot.plugin.as_ref())
    }

    /// Look up a sibling by section key and concrete type.
    #[must_use]
    pub fn get_as<T: Plugin>(&self, env_key: &str) -> Option<&'a T> {
        self.get(env_key)
            .and_then(|plugin| plugin.as_any().downcast_ref::<T>())
    }

    /// Whether a sibling with this key is part of the run.
    #[must_use]
    pub fn contains(&self, env_key: &str) -> bool {
        self.iter().any(|slot| slot.env_key == env_key)
    }

    /// Sibling keys in section order.
    pub fn keys(self) -> impl Iterator<Item = &'a str> {
        self.iter().map(|slot| slot.env_key.as_str())
    }
}

/// Everything a plugin sees during validate/start/poll-stop/stop.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleContext<'a> {
    /// Full resolved configuration of the run.
    pub config: &'a ResolvedConfig,
    /// Other plugins of the same run.
    pub siblings: Siblings<'a>,
}

impl<'a> LifecycleContext<'a> {
    /// Create a lifecycle context.
    #[must_use]
    pub fn new(config: &'a ResolvedConfig, siblings: Siblings<'a>) -> Self {
        Self { config, siblings }
    }
}

/// Split `slots` into the slot at `index` and a sibling view of the rest.
pub(crate) fn split_slot(
    slots: &mut [PluginSlot],
    index: usize,
) -> Option<(&mut PluginSlot, Siblings<'_>)> {
    if index >= slots.len() {
        return None;
    }
    let (before, rest) = slots.split_at_mut(index);
    let (current, after) = rest.split_first_mut()?;
    Some((current, Siblings::new(before, after)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Marker {
        label: String,
    }

    #[async_trait]
    impl Plugin for Marker {
        fn parse_config(&mut self, section: &serde_json::Value) -> anyhow::Result<()> {
            self.label = section["label"].as_str().unwrap_or_default().to_string();
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn slots() -> Vec<PluginSlot> {
        ["a", "b", "c"]
            .into_iter()
            .map(|key| {
                PluginSlot::new(
                    key,
                    Box::new(Marker {
                        label: key.to_uppercase(),
                    }),
                )
            })
            .collect()
    }

    #[test]
    fn test_split_slot_excludes_current() {
        let mut slots = slots();
        let (current, siblings) = split_slot(&mut slots, 1).unwrap();
        assert_eq!(current.env_key, "b");
        assert_eq!(siblings.keys().collect::<Vec<_>>(), vec!["a", "c"]);
        assert!(!siblings.contains("b"));
    }

    #[test]
    fn test_split_slot_out_of_range() {
        let mut slots = slots();
        assert!(split_slot(&mut slots, 3).is_none());
    }

    #[test]
    fn test_sibling_downcast() {
        let mut slots = slots();
        let (_, siblings) = split_slot(&mut slots, 0).unwrap();
        let marker = siblings.get_as::<Marker>("c").unwrap();
        assert_eq!(marker.label, "C");
        assert!(siblings.get_as::<LifetimePlugin>("c").is_none());
    }

    #[test]
    fn test_step_names() {
        assert_eq!(PluginStep::PollStop.to_string(), "poll_stop");
        assert_eq!(
            serde_json::to_string(&PluginStep::ParseConfig).unwrap(),
            "\"parse_config\""
        );
    }
}
