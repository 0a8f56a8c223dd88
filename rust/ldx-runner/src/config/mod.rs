//! Configuration management for LDX Runner.
//!
//! Two unrelated kinds of configuration live here:
//!
//! - [`AppConfig`]: the runner's own settings (bind address, worker pool,
//!   file locations), loaded from defaults, an optional config file and
//!   `LDX__*` environment variables.
//! - [`ResolvedConfig`]: the plugin configuration of one run, produced by the
//!   [`ConfigResolver`] from global settings, an instance file and templates.
//!
//! ```rust,ignore
//! use ldx_runner::config::{AppConfig, ConfigValidator};
//!
//! let config = AppConfig::load()?;
//! ConfigValidator::validate(&config)?;
//! ```

pub mod error;
pub mod resolver;
pub mod source;
pub mod validator;

pub use error::{ConfigError, ConfigResult, ConfigurationError};
pub use resolver::{ConfigResolver, ResolvedConfig, SCHEDULE_SECTION, TEMPLATE_PREFIX};
pub use validator::ConfigValidator;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Worker pool and lifecycle polling.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Config directory and registry file.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment and config files.
    ///
    /// Sources, later ones winning:
    /// 1. Default values
    /// 2. `config/ldx-runner.{toml,yaml,json}` if present
    /// 3. `LDX__*` environment variables (`LDX__SCHEDULER__MAX_WORKERS=4`)
    ///
    /// The result is validated. Use [`Self::load_unchecked`] to skip that.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with_file(None)
    }

    /// Like [`Self::load`], with an extra config file layered over the
    /// default one.
    pub fn load_with_file(file: Option<&Path>) -> anyhow::Result<Self> {
        let config = Self::load_unchecked(file)?;

        ConfigValidator::validate(&config)
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked(file: Option<&Path>) -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder()
            .set_default("server.host", default_host())?
            .set_default("logging.level", default_log_level())?
            .add_source(config::File::with_name("config/ldx-runner").required(false));

        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("LDX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Poll interval as a [`std::time::Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.scheduler.poll_interval_ms)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// API port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum executions running at once.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Delay between poll-stop cycles of a running execution.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_max_workers() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// File locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory with `global.toml`, templates, plugin manifests and job
    /// configs.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
    /// Job registry file.
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
}

/// `~/.ldx`, falling back to `./.ldx` when no home directory is known.
fn ldx_home() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
        .join(".ldx")
}

fn default_config_dir() -> PathBuf {
    ldx_home().join("runner").join("configs")
}

fn default_registry_path() -> PathBuf {
    ldx_home().join("server").join("registry.json")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            registry_path: default_registry_path(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}
