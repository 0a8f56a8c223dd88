//! Logging setup and timing helpers.
//!
//! [`init_tracing`] installs the global subscriber from [`LoggingConfig`].
//! [`OpTimer`] times named operations (registry flushes, runs, startup) and
//! the `log_*` macros give startup output a consistent shape.

use std::time::Instant;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `level_override`, which wins over `config.level`.
/// Calling this twice is harmless; the second call is ignored.
///
/// # Parameters
///
/// - `config`: level and output format (`pretty` or `json`)
/// - `level_override`: filter directive from the command line, if any
///
/// # Examples
///
/// ```rust,ignore
/// let config = AppConfig::load()?;
/// init_tracing(&config.logging, Some("ldx_runner=debug"));
/// ```
pub fn init_tracing(config: &LoggingConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Measures one operation and logs its duration.
///
/// The start is logged at trace level; completion at debug level, or at
/// error level when [`finish_with_result`](Self::finish_with_result) sees
/// an error.
///
/// # Examples
///
/// ```rust,ignore
/// use ldx_runner::logging::OpTimer;
///
/// let timer = OpTimer::new("registry", "flush");
/// let result = write_file().await;
/// timer.finish_with_result(result.as_ref());
/// ```
#[derive(Debug)]
pub struct OpTimer {
    component: &'static str,
    operation: String,
    start: Instant,
}

impl OpTimer {
    /// Start timing `component/operation` and log the start.
    ///
    /// # Parameters
    ///
    /// - `component`: the subsystem being timed (e.g. `"registry"`)
    /// - `operation`: what it is doing (e.g. `"flush"`, a job id)
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let timer = OpTimer::new("engine", "run");
    /// ```
    #[must_use]
    pub fn new(component: &'static str, operation: impl Into<String>) -> Self {
        let operation = operation.into();
        tracing::trace!(component, operation = %operation, "Operation started");
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }

    /// Milliseconds since the timer started.
    #[must_use]
    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }

    /// Log completion at debug level.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let timer = OpTimer::new("server", "router");
    /// let app = build_router(state);
    /// timer.finish();
    /// ```
    pub fn finish(self) {
        tracing::debug!(
            component = self.component,
            operation = %self.operation,
            duration_ms = self.elapsed_ms(),
            "Operation completed"
        );
    }

    /// Log success at debug level or failure at error level.
    ///
    /// # Parameters
    ///
    /// - `result`: the operation's result, borrowed; the error is logged
    ///   with its `Display` text
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let timer = OpTimer::new("registry", "flush");
    /// let result = tokio::fs::write(&path, bytes).await;
    /// timer.finish_with_result(result.as_ref());
    /// ```
    pub fn finish_with_result<T, E: std::fmt::Display>(self, result: Result<&T, &E>) {
        let duration_ms = self.elapsed_ms();
        match result {
            Ok(_) => {
                tracing::debug!(
                    component = self.component,
                    operation = %self.operation,
                    duration_ms,
                    "Operation completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    component = self.component,
                    operation = %self.operation,
                    duration_ms,
                    error = %e,
                    "Operation failed"
                );
            }
        }
    }
}

/// Log a numbered startup step.
///
/// # Examples
///
/// ```rust,ignore
/// log_init_step!(2, 4, "Job registry", "3 jobs loaded");
/// ```
#[macro_export]
macro_rules! log_init_step {
    ($step:expr, $total:expr, $name:expr, $detail:expr) => {
        tracing::info!(
            step = $step,
            total = $total,
            "[{}/{}] {} - {}",
            $step,
            $total,
            $name,
            $detail
        );
    };
    ($step:expr, $total:expr, $name:expr) => {
        tracing::info!(step = $step, total = $total, "[{}/{}] {}", $step, $total, $name);
    };
}

/// Log a non-fatal startup problem.
///
/// # Examples
///
/// ```rust,ignore
/// log_init_warning!("Failed to load plugin manifests: {}", e);
/// ```
#[macro_export]
macro_rules! log_init_warning {
    ($msg:expr) => {
        tracing::warn!("[warn] {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        tracing::warn!("[warn] {}", format!($msg, $($arg)*));
    };
}

/// Log the successful end of a startup phase.
///
/// # Examples
///
/// ```rust,ignore
/// log_success!("LDX Runner server created successfully");
/// ```
#[macro_export]
macro_rules! log_success {
    ($msg:expr) => {
        tracing::info!("[ok] {}", $msg);
    };
    ($msg:expr, $($arg:tt)*) => {
        tracing::info!("[ok] {}", format!($msg, $($arg)*));
    };
}

/// Log a framed banner.
///
/// # Examples
///
/// ```rust,ignore
/// log_banner!("LDX Runner v0.1.0", "Workers: 4 | Config dir: config");
/// ```
#[macro_export]
macro_rules! log_banner {
    ($title:expr) => {
        tracing::info!("==================================================");
        tracing::info!("  {}", $title);
        tracing::info!("==================================================");
    };
    ($title:expr, $subtitle:expr) => {
        tracing::info!("==================================================");
        tracing::info!("  {}", $title);
        tracing::info!("  {}", $subtitle);
        tracing::info!("==================================================");
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_timer_fields() {
        let timer = OpTimer::new("registry", "flush");
        assert_eq!(timer.component, "registry");
        assert_eq!(timer.operation, "flush");
        assert!(timer.elapsed_ms() < 1_000);
        timer.finish();
    }

    #[test]
    fn test_op_timer_finish_with_error() {
        let timer = OpTimer::new("engine", "run");
        let result: Result<(), String> = Err("plugin failed".to_string());
        timer.finish_with_result(result.as_ref());
    }

    #[test]
    fn test_init_tracing_twice() {
        let config = LoggingConfig::default();
        init_tracing(&config, Some("debug"));
        init_tracing(&config, None);
    }
}
