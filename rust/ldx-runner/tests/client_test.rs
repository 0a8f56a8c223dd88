//! Client subcommands against a live server on a local port.

use std::time::Duration;

use tokio::net::TcpListener;

use ldx_runner::client::{load_job_file, ClientError, SchedulerClient};
use ldx_runner::config::AppConfig;
use ldx_runner::registry::JobFilter;
use ldx_runner::scheduler::SchedulerService;
use ldx_runner::server::create_app;

struct LiveServer {
    client: SchedulerClient,
    scheduler: SchedulerService,
    handle: tokio::task::JoinHandle<()>,
    dir: tempfile::TempDir,
}

async fn live_server() -> LiveServer {
    let dir = tempfile::tempdir().unwrap();
    let configs = dir.path().join("configs");
    std::fs::create_dir_all(&configs).unwrap();
    std::fs::write(configs.join("short.template.toml"), "lifetime = 0.05\n").unwrap();

    let mut config = AppConfig::default();
    config.paths.config_dir = configs;
    config.paths.registry_path = dir.path().join("registry.json");
    config.scheduler.poll_interval_ms = 10;

    let (app, scheduler) = create_app(config).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    LiveServer {
        client: SchedulerClient::new(format!("http://127.0.0.1:{port}")),
        scheduler,
        handle,
        dir,
    }
}

impl LiveServer {
    async fn stop(self) {
        self.handle.abort();
        self.scheduler.shutdown().await;
    }
}

#[tokio::test]
async fn test_register_trigger_and_inspect() {
    let server = live_server().await;
    let client = &server.client;

    let health = client.health().await.unwrap();
    assert_eq!(health["status"], "healthy");

    let job_file = server.dir.path().join("manual.toml");
    std::fs::write(&job_file, "lifetime = \"template::short\"\n").unwrap();
    let request = load_job_file(&job_file, None, false).unwrap();
    let registered = client.register(&request).await.unwrap();
    assert_eq!(registered["job_id"], "manual");
    assert_eq!(registered["status"], "registered");

    let triggered = client.trigger("manual").await.unwrap();
    let execution_id = triggered["execution_id"].as_str().unwrap().to_string();

    let mut status = serde_json::Value::Null;
    for _ in 0..200 {
        status = client.status(&execution_id).await.unwrap();
        if status["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status["status"], "completed");

    let jobs = client.jobs().await.unwrap();
    assert_eq!(jobs["count"], 1);
    let active = client.active().await.unwrap();
    assert_eq!(active["count"], 0);

    let on_demand = client.registry(JobFilter::OnDemand).await.unwrap();
    assert_eq!(on_demand["count"], 1);
    let info = client.info("manual").await.unwrap();
    assert_eq!(info["execution_count"], 1);

    let removed = client.cancel(&execution_id).await.unwrap();
    assert_eq!(removed["status"], "removed");
    let gone = client.unregister("manual").await.unwrap();
    assert_eq!(gone["status"], "unregistered");

    server.stop().await;
}

#[tokio::test]
async fn test_scheduled_file_and_server_errors() {
    let server = live_server().await;
    let client = &server.client;

    let job_file = server.dir.path().join("nightly.toml");
    std::fs::write(
        &job_file,
        "[lifetime]\nlifetime = 1\n\n[schedule]\ntrigger = \"cron\"\nhour = 2\n",
    )
    .unwrap();
    let registered = client
        .register(&load_job_file(&job_file, None, false).unwrap())
        .await
        .unwrap();
    assert_eq!(registered["status"], "scheduled");

    let err = client
        .register(&load_job_file(&job_file, Some("copy".into()), false).unwrap())
        .await
        .unwrap_err();
    let ClientError::Api { status, ref kind, .. } = err else {
        panic!("expected an API error, got {err:?}");
    };
    assert_eq!(status, 409);
    assert_eq!(kind, "schedule_conflict");
    assert!(err.hint().unwrap().contains("nightly"));

    let err = client.trigger("ghost").await.unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 404, .. }));

    let cancelled = client.cancel("nightly").await.unwrap();
    assert_eq!(cancelled["status"], "cancelled");

    server.stop().await;
}

#[tokio::test]
async fn test_unreachable_server_is_request_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = SchedulerClient::new(format!("http://127.0.0.1:{port}"));
    assert!(matches!(client.health().await, Err(ClientError::Request(_))));
}
