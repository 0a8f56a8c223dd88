//! LDX Runner - Main Entry Point
//!
//! Runs plugin configurations directly, or serves the scheduler REST API.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use mimalloc::MiMalloc;

use ldx_runner::client::{load_job_file, ClientError, SchedulerClient, DEFAULT_SERVER_URL};
use ldx_runner::config::AppConfig;
use ldx_runner::engine::{ExecutionInstance, ExecutionOutcome};
use ldx_runner::logging::init_tracing;
use ldx_runner::registry::JobFilter;
use ldx_runner::server::{create_app, load_plugins, load_resolver};

// Use mimalloc for better performance
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "ldx-runner")]
#[command(about = "LDX Runner - plugin lifecycle engine and job scheduler")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Settings file layered over `config/ldx-runner.*`.
    #[arg(short, long, env = "LDX_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directive.
    #[arg(long, env = "LDX_LOG_LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the scheduler REST server.
    Serve {
        /// Host to bind to.
        #[arg(long, env = "LDX_HOST")]
        host: Option<String>,

        /// Port to listen on.
        #[arg(short, long, env = "LDX_PORT")]
        port: Option<u16>,
    },
    /// Run one configuration now and exit.
    Run {
        /// Instance config, relative to the config directory or absolute.
        file: PathBuf,
    },
    /// Talk to a running server.
    Client {
        /// Server URL.
        #[arg(short, long, env = "LDX_SERVER", default_value = DEFAULT_SERVER_URL)]
        server: String,

        #[command(subcommand)]
        command: ClientCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ClientCommand {
    /// Check server health.
    Health,
    /// Register a job from a TOML file; a `[schedule]` section schedules it.
    Register {
        /// Job file.
        file: PathBuf,
        /// Job id (default: file name without extension).
        #[arg(short, long)]
        job_id: Option<String>,
        /// Replace an existing job with the same id.
        #[arg(long)]
        replace: bool,
    },
    /// Run a registered job now.
    Trigger {
        /// Job id.
        job_id: String,
    },
    /// List executions, running executions or registry entries.
    #[command(subcommand)]
    List(ListCommand),
    /// Status of an execution or a scheduled job.
    Status {
        /// Execution id or job id.
        id: String,
    },
    /// Registry entry of a job.
    Info {
        /// Job id.
        job_id: String,
    },
    /// Cancel a scheduled job or drop a finished execution.
    Cancel {
        /// Job id or execution id.
        id: String,
    },
    /// Remove a job from the registry.
    Unregister {
        /// Job id.
        job_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ListCommand {
    /// Tracked executions and installed schedules.
    Jobs,
    /// Running executions.
    Active,
    /// Registered jobs.
    Registry {
        /// `all`, `scheduled` or `on_demand`.
        #[arg(short = 't', long = "type", default_value = "all")]
        filter: JobFilter,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_with_file(cli.common.config.as_deref())?;
    init_tracing(&config.logging, cli.common.log_level.as_deref());

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { file } => run_once(&config, &file).await,
        Command::Client { server, command } => run_client(&server, command).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!("Starting LDX Runner v{}", env!("CARGO_PKG_VERSION"));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let (app, scheduler) = create_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Resolve `file` and drive it through the lifecycle, bypassing the registry.
async fn run_once(config: &AppConfig, file: &Path) -> anyhow::Result<ExitCode> {
    let plugins = load_plugins(config)?;
    let resolver = load_resolver(config);

    let mut resolved = resolver.resolve_file(file)?;
    if resolved.take_schedule()?.is_some() {
        tracing::info!("Ignoring schedule section for a direct run");
    }

    let mut instance =
        ExecutionInstance::new(resolved, &plugins)?.with_poll_interval(config.poll_interval());
    tracing::info!(plugins = ?instance.plugin_keys(), file = %file.display(), "Running configuration");

    let outcome = instance.run().await;
    match &outcome {
        ExecutionOutcome::Completed { .. } => Ok(ExitCode::SUCCESS),
        ExecutionOutcome::Aborted { .. } | ExecutionOutcome::Failed { .. } => {
            if let Some(message) = outcome.error_message() {
                tracing::error!("{message}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Send one request to the server and print the JSON answer.
async fn run_client(server: &str, command: ClientCommand) -> anyhow::Result<ExitCode> {
    let client = SchedulerClient::new(server);
    let result = match command {
        ClientCommand::Health => client.health().await,
        ClientCommand::Register { file, job_id, replace } => match load_job_file(&file, job_id, replace) {
            Ok(request) => client.register(&request).await,
            Err(e) => Err(e),
        },
        ClientCommand::Trigger { job_id } => client.trigger(&job_id).await,
        ClientCommand::List(ListCommand::Jobs) => client.jobs().await,
        ClientCommand::List(ListCommand::Active) => client.active().await,
        ClientCommand::List(ListCommand::Registry { filter }) => client.registry(filter).await,
        ClientCommand::Status { id } => client.status(&id).await,
        ClientCommand::Info { job_id } => client.info(&job_id).await,
        ClientCommand::Cancel { id } => client.cancel(&id).await,
        ClientCommand::Unregister { job_id } => client.unregister(&job_id).await,
    };

    match result {
        Ok(body) => {
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ ClientError::Api { .. }) => {
            eprintln!("Error: {e}");
            if let Some(hint) = e.hint() {
                eprintln!("Hint: {hint}");
            }
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
