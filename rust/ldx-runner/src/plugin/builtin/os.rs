//! Shell command plugin.
//!
//! ```toml
//! [os]
//! cmd = "start C:/Tools/monitor.exe"
//! kill = "monitor.exe"
//!
//! [lifetime]
//! lifetime = 3600
//! ```
//!
//! Runs `cmd` at start. When `kill` is set and a `lifetime` plugin is part of
//! the run, the named process is queued on its kill list.

use std::any::Any;

use async_trait::async_trait;
use serde::Deserialize;

use super::lifetime::{KillTarget, LifetimePlugin};
use super::shell_command;
use crate::plugin::{LifecycleContext, Plugin};

#[derive(Debug, Deserialize)]
struct OsSettings {
    cmd: String,
    #[serde(default)]
    kill: Option<String>,
}

/// Runs a shell command when the run starts.
#[derive(Debug, Default)]
pub struct OsPlugin {
    settings: Option<OsSettings>,
}

impl OsPlugin {
    /// Process name to queue for termination, if any.
    ///
    /// Only the first word counts, so `kill = "monitor.exe --flag"` targets
    /// `monitor.exe`.
    fn kill_target(&self) -> Option<&str> {
        self.settings
            .as_ref()
            .and_then(|s| s.kill.as_deref())
            .and_then(|kill| kill.split_whitespace().next())
    }
}

#[async_trait]
impl Plugin for OsPlugin {
    fn parse_config(&mut self, section: &serde_json::Value) -> anyhow::Result<()> {
        self.settings = Some(serde_json::from_value(section.clone())?);
        Ok(())
    }

    async fn validate(&mut self, _ctx: &LifecycleContext<'_>) -> bool {
        let has_cmd = self
            .settings
            .as_ref()
            .is_some_and(|s| !s.cmd.trim().is_empty());
        if !has_cmd {
            tracing::warn!("os plugin requires a non-empty cmd");
        }
        has_cmd
    }

    async fn start(&mut self, ctx: &LifecycleContext<'_>) -> anyhow::Result<()> {
        let Some(settings) = self.settings.as_ref() else {
            anyhow::bail!("os plugin started without configuration");
        };

        tracing::info!(cmd = %settings.cmd, "Running command");
        let status = shell_command(&settings.cmd).status().await?;
        if !status.success() {
            anyhow::bail!("command '{}' exited with {status}", settings.cmd);
        }

        if let Some(name) = self.kill_target() {
            match ctx.siblings.get_as::<LifetimePlugin>("lifetime") {
                Some(lifetime) => {
                    lifetime
                        .kill_list()
                        .push(KillTarget::Process(name.to_string()));
                }
                None => {
                    tracing::debug!(process = %name, "No lifetime plugin, kill target ignored");
                }
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
