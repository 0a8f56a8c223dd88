//! LDX Runner - plugin lifecycle engine and job scheduler
//!
//! This crate runs automation tasks ("plugins") against a controlled external
//! resource. A run takes a resolved configuration, instantiates the plugins it
//! names and drives them through a fixed lifecycle:
//!
//! - **parse-config** - each plugin reads its own section
//! - **validate** - all-or-nothing gate; one `false` aborts the run
//! - **start** - in section order
//! - **poll-stop** - polled until any plugin asks to stop
//! - **stop** - reverse order, for every plugin that was started
//!
//! Runs can be launched directly or registered as jobs and fired by the
//! scheduler on a cron/interval trigger or on demand.
//!
//! # Architecture
//!
//! - [`plugin`]: plugin capability trait, registry and built-in plugins
//! - [`config`]: application settings and the plugin config resolver
//! - [`engine`]: execution instance lifecycle state machine
//! - [`scheduler`]: triggers, execution tracking and the worker pool
//! - [`registry`]: durable job registry
//! - [`api`]: HTTP API endpoints
//! - [`client`]: HTTP client for a running server
//!
//! # Example
//!
//! ```rust,ignore
//! use ldx_runner::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let (app, _scheduler) = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:5000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod engine;
pub mod logging;
pub mod plugin;
pub mod registry;
pub mod scheduler;
pub mod server;

use std::sync::Arc;

use config::{AppConfig, ConfigResolver};
use registry::JobRegistry;
use scheduler::SchedulerService;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Scheduler service owning triggers and execution tracking.
    pub scheduler: SchedulerService,
    /// Durable job registry (read access for the registry endpoints).
    pub registry: Arc<JobRegistry>,
    /// Resolver applying global settings and templates to submitted configs.
    pub resolver: Arc<ConfigResolver>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("scheduler", &self.scheduler)
            .field("registry", &self.registry)
            .field("templates", &self.resolver.template_names())
            .finish()
    }
}
