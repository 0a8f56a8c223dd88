//! Execution lifecycle.
//!
//! An [`ExecutionInstance`] owns the plugins of one run and drives them
//! through a fixed state machine:
//!
//! ```text
//! Loaded -> Validated -> Running -> Polling -> Stopping -> Completed
//!        \-> Aborted                        \-> Stopping -> Failed
//! ```
//!
//! A plugin is only started when every plugin of the run validated, and
//! every started plugin is stopped exactly once, in reverse start order.

mod instance;

pub use instance::{DEFAULT_POLL_INTERVAL, ExecutionInstance};

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::plugin::{PluginRegistryError, PluginStep};

/// Lifecycle phase of an execution instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Plugins instantiated and configured.
    Loaded,
    /// Every plugin accepted the run.
    Validated,
    /// A plugin rejected the run; nothing was started.
    Aborted,
    /// Start steps in progress.
    Running,
    /// Waiting for a plugin to ask for stop.
    Polling,
    /// Stop steps in progress.
    Stopping,
    /// Finished without errors.
    Completed,
    /// Finished after an error.
    Failed,
}

impl Phase {
    /// Phase name as used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Validated => "validated",
            Self::Aborted => "aborted",
            Self::Running => "running",
            Self::Polling => "polling",
            Self::Stopping => "stopping",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the phase is final.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted | Self::Completed | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plugin step failed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("plugin '{env_key}' failed during {step}: {message}")]
pub struct PluginRuntimeError {
    /// Section key of the failing plugin.
    pub env_key: String,
    /// Step that failed.
    pub step: PluginStep,
    /// Error text, including its cause chain.
    pub message: String,
}

impl PluginRuntimeError {
    pub(crate) fn new(env_key: &str, step: PluginStep, error: &anyhow::Error) -> Self {
        Self {
            env_key: env_key.to_string(),
            step,
            message: format!("{error:#}"),
        }
    }
}

/// Errors raised before a run starts.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A plugin could not be created.
    #[error(transparent)]
    Plugin(#[from] PluginRegistryError),

    /// A plugin rejected its own section.
    #[error("plugin '{env_key}' rejected its configuration: {message}")]
    ParseConfig {
        /// Section key.
        env_key: String,
        /// Parse error text.
        message: String,
    },
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Every stop step succeeded.
    Completed {
        /// Plugin whose poll-stop ended the run, if any.
        stopped_by: Option<String>,
    },
    /// Validation failed; no plugin was started.
    Aborted {
        /// Plugins whose validate step returned false.
        rejected_by: Vec<String>,
    },
    /// A start, poll-stop or stop step failed.
    Failed {
        /// First error of the run.
        error: PluginRuntimeError,
    },
}

impl ExecutionOutcome {
    /// Terminal phase matching this outcome.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Completed { .. } => Phase::Completed,
            Self::Aborted { .. } => Phase::Aborted,
            Self::Failed { .. } => Phase::Failed,
        }
    }

    /// Whether the run completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Human-readable failure description, `None` on success.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Completed { .. } => None,
            Self::Aborted { rejected_by } => Some(format!(
                "validation failed for: {}",
                rejected_by.join(", ")
            )),
            Self::Failed { error } => Some(error.to_string()),
        }
    }
}
