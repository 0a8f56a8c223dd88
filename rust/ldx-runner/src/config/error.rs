//! Configuration error types.
//!
//! Two families live here:
//!
//! - [`ConfigurationError`]: problems with the runner's own settings
//!   (`AppConfig`), reported at startup with a hint on how to fix them.
//! - [`ConfigError`]: problems with a plugin configuration (missing template,
//!   unreadable file, bad schedule). These surface before any run starts and
//!   are never retried.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Application settings errors with actionable messages.
///
/// Each variant carries enough context for an operator to fix the problem
/// without reading the source: what is wrong and where to change it.
/// Validation collects every problem before failing, so a single startup
/// reports all of them through [`ConfigurationError::Multiple`].
///
/// # Examples
///
/// ```rust,ignore
/// use ldx_runner::config::ConfigurationError;
///
/// let err = ConfigurationError::invalid(
///     "server.port cannot be 0",
///     "Set LDX__SERVER__PORT to a free port",
/// );
/// assert_eq!(err.count(), 1);
/// ```
#[derive(Debug, Clone)]
pub enum ConfigurationError {
    /// Invalid configuration value.
    Invalid {
        /// What is wrong.
        message: String,
        /// How to fix it.
        fix_hint: String,
    },
    /// A required setting is missing.
    MissingRequired {
        /// The missing setting name.
        setting: String,
        /// What needs this setting.
        context: String,
        /// Environment variable to set.
        env_var: String,
    },
    /// Multiple errors occurred.
    Multiple(Vec<ConfigurationError>),
}

impl std::error::Error for ConfigurationError {}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { message, fix_hint } => {
                write!(
                    f,
                    "Invalid configuration: {message}\n\nHow to fix: {fix_hint}"
                )
            }
            Self::MissingRequired {
                setting,
                context,
                env_var,
            } => {
                write!(
                    f,
                    "Missing required configuration: {setting}\n\n\
                    Required for: {context}\n\
                    Set via: {env_var}"
                )
            }
            Self::Multiple(errors) => {
                writeln!(f, "Multiple configuration errors:")?;
                for (i, err) in errors.iter().enumerate() {
                    writeln!(f, "\n{}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl ConfigurationError {
    /// Create an invalid configuration error.
    ///
    /// # Parameters
    ///
    /// - `message`: what is wrong with the value
    /// - `fix_hint`: how to fix it, usually naming the variable to set
    #[must_use]
    pub fn invalid(message: impl Into<String>, fix_hint: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            fix_hint: fix_hint.into(),
        }
    }

    /// Create a missing required configuration error.
    ///
    /// # Parameters
    ///
    /// - `setting`: dotted setting name, e.g. `paths.config_dir`
    /// - `context`: what needs the setting
    /// - `env_var`: environment variable that supplies it
    #[must_use]
    pub fn missing_required(
        setting: impl Into<String>,
        context: impl Into<String>,
        env_var: impl Into<String>,
    ) -> Self {
        Self::MissingRequired {
            setting: setting.into(),
            context: context.into(),
            env_var: env_var.into(),
        }
    }

    /// Create a multiple errors wrapper.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let err = ConfigurationError::multiple(vec![
    ///     ConfigurationError::invalid("bad port", "use 1-65535"),
    ///     ConfigurationError::invalid("bad level", "use info or debug"),
    /// ]);
    /// assert_eq!(err.count(), 2);
    /// ```
    #[must_use]
    pub fn multiple(errors: Vec<ConfigurationError>) -> Self {
        Self::Multiple(errors)
    }

    /// Get the number of errors (1 for single errors, N for multiple).
    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Multiple(errors) => errors.len(),
            _ => 1,
        }
    }
}

/// Result type for settings validation.
pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Plugin configuration errors.
///
/// Raised while reading, merging or resolving a job's configuration. The
/// API maps each one to `400 Bad Request` with [`ConfigError::kind`] as the
/// error field.
///
/// # Examples
///
/// ```rust,ignore
/// use ldx_runner::config::ConfigError;
///
/// let err = ConfigError::MissingTemplate { name: "base".into() };
/// assert_eq!(err.kind(), "missing_template");
/// assert_eq!(err.to_string(), "template 'base' is not defined");
/// ```
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A `template::<name>` reference names no loaded template.
    #[error("template '{name}' is not defined")]
    MissingTemplate {
        /// Referenced template name.
        name: String,
    },

    /// Templates reference each other in a loop.
    #[error("template '{name}' references itself")]
    TemplateCycle {
        /// Template where the loop was detected.
        name: String,
    },

    /// A configuration file does not exist or cannot be read.
    #[error("cannot resolve {}: {reason}", path.display())]
    UnresolvablePath {
        /// Offending path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// A configuration file is not valid TOML or not a table.
    #[error("failed to parse {}: {reason}", path.display())]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// A section has the wrong shape.
    #[error("invalid section '{key}': {reason}")]
    InvalidSection {
        /// Section key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// No section of the configuration maps to a registered plugin.
    #[error("no valid plugins found in configuration")]
    NoPlugins,

    /// The `schedule` section is malformed.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl ConfigError {
    /// Machine-readable error kind, used as the `error` field of API
    /// responses.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingTemplate { .. } => "missing_template",
            Self::TemplateCycle { .. } => "template_cycle",
            Self::UnresolvablePath { .. } => "unresolvable_path",
            Self::Parse { .. } => "parse_error",
            Self::InvalidSection { .. } => "invalid_section",
            Self::NoPlugins => "no_plugins",
            Self::InvalidSchedule(_) => "invalid_schedule",
        }
    }
}
