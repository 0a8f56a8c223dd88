//! Startup validation of the runner's settings.

use super::error::{ConfigResult, ConfigurationError};
use super::AppConfig;

/// Checks [`AppConfig`] before the server starts.
///
/// All problems are collected so one restart fixes them all.
#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire application configuration.
    pub fn validate(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_scheduler(config) {
            match e {
                ConfigurationError::Multiple(errs) => errors.extend(errs),
                e => errors.push(e),
            }
        }

        if let Err(e) = Self::validate_paths(config) {
            match e {
                ConfigurationError::Multiple(errs) => errors.extend(errs),
                e => errors.push(e),
            }
        }

        if let Err(e) = Self::validate_logging(config) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ConfigurationError::multiple(errors))
        }
    }

    /// Worker pool and polling settings.
    pub fn validate_scheduler(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if config.scheduler.max_workers == 0 {
            errors.push(ConfigurationError::invalid(
                "scheduler.max_workers must be at least 1",
                "Set LDX__SCHEDULER__MAX_WORKERS to a positive number (default: 10)",
            ));
        }

        if config.scheduler.poll_interval_ms == 0 {
            errors.push(ConfigurationError::invalid(
                "scheduler.poll_interval_ms must be greater than zero",
                "Set LDX__SCHEDULER__POLL_INTERVAL_MS to a positive number of \
                milliseconds (default: 1000)",
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigurationError::multiple(errors)),
        }
    }

    /// Config directory and registry file locations.
    pub fn validate_paths(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let paths = &config.paths;

        if paths.registry_path.as_os_str().is_empty() {
            errors.push(ConfigurationError::missing_required(
                "paths.registry_path",
                "Persisting job definitions",
                "LDX__PATHS__REGISTRY_PATH",
            ));
        } else if paths.registry_path.is_dir() {
            errors.push(ConfigurationError::invalid(
                format!(
                    "paths.registry_path points to a directory: {}",
                    paths.registry_path.display()
                ),
                "Point LDX__PATHS__REGISTRY_PATH at a file, e.g. ~/.ldx/server/registry.json",
            ));
        }

        if paths.config_dir.is_file() {
            errors.push(ConfigurationError::invalid(
                format!(
                    "paths.config_dir points to a file: {}",
                    paths.config_dir.display()
                ),
                "Point LDX__PATHS__CONFIG_DIR at the directory holding job configs",
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigurationError::multiple(errors)),
        }
    }

    /// Log level must parse as a tracing filter.
    pub fn validate_logging(config: &AppConfig) -> ConfigResult<()> {
        if tracing_subscriber::EnvFilter::try_new(&config.logging.level).is_err() {
            return Err(ConfigurationError::invalid(
                format!("logging.level '{}' is not a valid filter", config.logging.level),
                "Use a level such as info, debug, or ldx_runner=debug",
            ));
        }
        Ok(())
    }
}
