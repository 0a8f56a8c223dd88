//! Time-boxed runs.
//!
//! ```toml
//! [lifetime]
//! lifetime = 3600
//! ```
//!
//! Ends the run once `lifetime` seconds (fractions allowed) have passed since
//! start. Siblings may queue processes on the [`KillList`]; they are
//! terminated when the plugin stops.

use std::any::Any;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::time::Instant;

use crate::plugin::{LifecycleContext, Plugin};

/// Something to terminate at shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillTarget {
    /// Terminate every process with this executable name.
    Process(String),
}

/// Shared queue of shutdown targets.
#[derive(Debug, Default)]
pub struct KillList {
    targets: Mutex<Vec<KillTarget>>,
}

impl KillList {
    /// Queue a target.
    pub fn push(&self, target: KillTarget) {
        self.targets.lock().push(target);
    }

    /// Take every queued target.
    pub fn drain(&self) -> Vec<KillTarget> {
        std::mem::take(&mut *self.targets.lock())
    }

    /// Number of queued targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.lock().len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.lock().is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct LifetimeSettings {
    lifetime: f64,
}

/// Stops the run after a fixed number of seconds.
#[derive(Debug, Default)]
pub struct LifetimePlugin {
    settings: Option<LifetimeSettings>,
    deadline: Option<Instant>,
    kill_list: KillList,
}

impl LifetimePlugin {
    /// Processes to terminate when the run stops.
    #[must_use]
    pub fn kill_list(&self) -> &KillList {
        &self.kill_list
    }

    fn lifetime_secs(&self) -> f64 {
        self.settings.as_ref().map_or(0.0, |s| s.lifetime)
    }
}

#[async_trait]
impl Plugin for LifetimePlugin {
    fn parse_config(&mut self, section: &serde_json::Value) -> anyhow::Result<()> {
        self.settings = Some(serde_json::from_value(section.clone())?);
        Ok(())
    }

    async fn validate(&mut self, _ctx: &LifecycleContext<'_>) -> bool {
        let lifetime = self.lifetime_secs();
        if lifetime.is_nan() || lifetime <= 0.0 {
            tracing::warn!(lifetime, "lifetime must be greater than zero");
            return false;
        }
        true
    }

    async fn start(&mut self, _ctx: &LifecycleContext<'_>) -> anyhow::Result<()> {
        let secs = self.lifetime_secs();
        self.deadline = Some(Instant::now() + Duration::try_from_secs_f64(secs)?);
        tracing::debug!(lifetime_secs = secs, "Lifetime deadline set");
        Ok(())
    }

    async fn poll_stop(&mut self, _ctx: &LifecycleContext<'_>) -> anyhow::Result<bool> {
        Ok(self.deadline.is_some_and(|deadline| Instant::now() >= deadline))
    }

    async fn stop(&mut self, _ctx: &LifecycleContext<'_>) -> anyhow::Result<()> {
        for target in self.kill_list.drain() {
            match target {
                KillTarget::Process(name) => {
                    tracing::info!(process = %name, "Terminating process");
                    if let Err(e) = terminate_process(&name).await {
                        tracing::warn!(process = %name, error = %e, "Failed to terminate process");
                    }
                }
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

async fn terminate_process(name: &str) -> anyhow::Result<()> {
    let status = if cfg!(windows) {
        tokio::process::Command::new("taskkill")
            .args(["/IM", name, "/F"])
            .status()
            .await?
    } else {
        tokio::process::Command::new("pkill")
            .args(["-x", name])
            .status()
            .await?
    };

    if !status.success() {
        anyhow::bail!("terminate command exited with {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolvedConfig;
    use crate::plugin::Siblings;

    fn ctx(config: &ResolvedConfig) -> LifecycleContext<'_> {
        LifecycleContext::new(config, Siblings::empty())
    }

    #[tokio::test]
    async fn test_rejects_non_positive_lifetime() {
        let config = ResolvedConfig::default();
        let mut plugin = LifetimePlugin::default();
        plugin
            .parse_config(&serde_json::json!({ "lifetime": 0 }))
            .unwrap();
        assert!(!plugin.validate(&ctx(&config)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractional_lifetime() {
        let config = ResolvedConfig::default();
        let mut plugin = LifetimePlugin::default();
        plugin
            .parse_config(&serde_json::json!({ "lifetime": 0.25 }))
            .unwrap();
        assert!(plugin.validate(&ctx(&config)).await);
        plugin.start(&ctx(&config)).await.unwrap();
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!plugin.poll_stop(&ctx(&config)).await.unwrap());
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(plugin.poll_stop(&ctx(&config)).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_lifetime_is_parse_error() {
        let mut plugin = LifetimePlugin::default();
        assert!(plugin.parse_config(&serde_json::json!({})).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_deadline() {
        let config = ResolvedConfig::default();
        let mut plugin = LifetimePlugin::default();
        plugin
            .parse_config(&serde_json::json!({ "lifetime": 5 }))
            .unwrap();
        assert!(plugin.validate(&ctx(&config)).await);
        plugin.start(&ctx(&config)).await.unwrap();
        assert!(!plugin.poll_stop(&ctx(&config)).await.unwrap());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(plugin.poll_stop(&ctx(&config)).await.unwrap());
    }

    #[test]
    fn test_kill_list_drain() {
        let list = KillList::default();
        list.push(KillTarget::Process("notepad.exe".to_string()));
        assert_eq!(list.len(), 1);
        assert_eq!(
            list.drain(),
            vec![KillTarget::Process("notepad.exe".to_string())]
        );
        assert!(list.is_empty());
    }
}
