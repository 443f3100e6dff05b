use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lpe_api::config::ServerConfig;
use lpe_api::router::build_app_router;
use lpe_api::state::AppState;
use lpe_api::ws;
use lpe_db::SqliteJobStore;
use lpe_events::{EventBus, EventJournal, NotificationHub};
use lpe_pipeline::{PipelineCatalog, RemoteExecutorFactory};
use lpe_worker::{retention, JobManager, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_DATABASE_URL: &str = "sqlite://lpe-jobs.db?mode=rwc";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lpe_api=debug,lpe_worker=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().unwrap_or_else(|e| fail_startup("server configuration", e));
    let worker_config = WorkerConfig::from_env().unwrap_or_else(|e| fail_startup("worker configuration", e));
    tracing::info!(
        host = %config.host,
        port = config.port,
        max_concurrent_jobs = worker_config.max_concurrent_jobs,
        "Loaded configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.into());
    let pool = lpe_db::create_pool(&database_url)
        .await
        .unwrap_or_else(|e| fail_startup("database connection", e));
    lpe_db::health_check(&pool)
        .await
        .unwrap_or_else(|e| fail_startup("database health check", e));
    let store = SqliteJobStore::connect(pool)
        .await
        .unwrap_or_else(|e| fail_startup("database migrations", e));
    tracing::info!(%database_url, "Job store ready");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let journal_handle = tokio::spawn(EventJournal::run(event_bus.subscribe()));

    // --- Job manager ---
    let mut catalog = PipelineCatalog::new(Arc::new(RemoteExecutorFactory::new(
        worker_config.transform_service_url.clone(),
    )));
    if let Some(timeout) = worker_config.step_timeout {
        catalog = catalog.with_step_timeout(timeout);
    }
    let manager = JobManager::new(
        Arc::new(store),
        Arc::new(NotificationHub::new()),
        Arc::clone(&event_bus),
        Arc::new(catalog),
        worker_config.clone(),
    );
    match manager.recover().await {
        Ok(report) => tracing::info!(
            failed = report.failed,
            rescheduled = report.rescheduled,
            "Recovered unfinished jobs"
        ),
        Err(e) => tracing::error!(error = %e, "Job recovery failed"),
    }

    // --- Retention ---
    let retention_cancel = CancellationToken::new();
    let retention_handle = tokio::spawn(retention::run(
        Arc::clone(&manager),
        worker_config.retention,
        worker_config.retention_interval,
        retention_cancel.clone(),
    ));

    // --- WebSocket manager ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager));

    // --- App state ---
    let state = AppState {
        manager: Arc::clone(&manager),
        config: Arc::new(config.clone()),
        ws_manager: Arc::clone(&ws_manager),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = match config.host.parse() {
        Ok(ip) => SocketAddr::new(ip, config.port),
        Err(e) => fail_startup("HOST address", e),
    };
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| fail_startup("bind", e));

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    manager
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;

    retention_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;
    tracing::info!("Retention task stopped");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;
    heartbeat_handle.abort();

    // Dropping the last bus handle closes the broadcast channel and ends the journal.
    drop(manager);
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), journal_handle).await;

    tracing::info!("Graceful shutdown complete");
}

/// Log a fatal startup error and exit.
fn fail_startup(what: &str, error: impl std::fmt::Display) -> ! {
    tracing::error!(error = %error, "Startup failed: {what}");
    std::process::exit(1)
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
