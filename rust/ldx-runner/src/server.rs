//! HTTP server setup and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::api;
use crate::config::{AppConfig, ConfigResolver};
use crate::logging::OpTimer;
use crate::plugin::PluginRegistry;
use crate::registry::JobRegistry;
use crate::scheduler::SchedulerService;
use crate::{log_banner, log_init_step, log_init_warning, log_success, AppState};

/// LDX Runner version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build the plugin registry: built-ins, then user manifests from the
/// config directory.
pub fn load_plugins(config: &AppConfig) -> anyhow::Result<PluginRegistry> {
    let mut plugins = PluginRegistry::with_builtins()?;
    if let Err(e) = plugins.load_manifests(&config.paths.config_dir) {
        log_init_warning!("Failed to load plugin manifests: {}", e);
    }
    Ok(plugins)
}

/// Build the config resolver for the config directory, falling back to an
/// empty one if the directory cannot be read.
pub fn load_resolver(config: &AppConfig) -> ConfigResolver {
    ConfigResolver::from_dir(&config.paths.config_dir).unwrap_or_else(|e| {
        log_init_warning!("Config directory unusable, templates disabled: {}", e);
        ConfigResolver::new()
    })
}

/// Create the application with all routes and middleware.
///
/// Also returns the scheduler so the caller can shut it down after the
/// server stops.
pub async fn create_app(config: AppConfig) -> anyhow::Result<(Router, SchedulerService)> {
    let overall_timer = OpTimer::new("server", "create_app");

    log_banner!(
        format!("LDX Runner v{VERSION}"),
        format!(
            "Workers: {} | Config dir: {}",
            config.scheduler.max_workers,
            config.paths.config_dir.display()
        )
    );

    // [1/5] Plugin types
    let step_timer = OpTimer::new("server", "plugins");
    let plugins = Arc::new(load_plugins(&config)?);
    log_init_step!(1, 5, "Plugins", plugins.keys().join(", "));
    step_timer.finish();

    // [2/5] Config resolver
    let step_timer = OpTimer::new("server", "resolver");
    let resolver = Arc::new(load_resolver(&config));
    log_init_step!(
        2,
        5,
        "Config Resolver",
        format!("{} templates", resolver.template_names().len())
    );
    step_timer.finish();

    // [3/5] Job registry
    let step_timer = OpTimer::new("server", "registry");
    let registry = Arc::new(JobRegistry::load(&config.paths.registry_path).await?);
    log_init_step!(
        3,
        5,
        "Job Registry",
        format!("{} jobs from {}", registry.len(), registry.path().display())
    );
    step_timer.finish();

    // [4/5] Scheduler and recovery
    let step_timer = OpTimer::new("server", "scheduler");
    let scheduler = SchedulerService::new(Arc::clone(&registry), plugins, &config.scheduler);
    let recovered = scheduler.start();
    let imported = scheduler.load_config_directory(&resolver).await;
    log_init_step!(
        4,
        5,
        "Scheduler",
        format!("{recovered} schedules recovered, {imported} jobs imported")
    );
    step_timer.finish();

    // [5/5] Router
    let step_timer = OpTimer::new("server", "router");
    let state = AppState {
        config: Arc::new(config),
        scheduler: scheduler.clone(),
        registry,
        resolver,
    };
    let app = build_router(state);
    log_init_step!(5, 5, "Router", "Routes + middleware configured");
    step_timer.finish();

    overall_timer.finish();
    log_success!("LDX Runner server created successfully");

    Ok((app, scheduler))
}

/// Routes plus middleware over `state`.
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.server.timeout_secs);
    api::create_router()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
