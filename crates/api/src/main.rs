use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, StatusCode};
use axum::Router;
use cutover_db::{MemoryStore, PgRecordStore, RecordStore};
use cutover_migration::prerequisites::SystemResources;
use cutover_migration::{IdentityTransform, MigrationConfig};
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cutover_api::background;
use cutover_api::config::{ServerConfig, StoreBackend, StoreConfig};
use cutover_api::routes;
use cutover_api::state::{AppState, StateDeps};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cutover_api=debug,cutover_migration=debug,cutover_events=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let store_config = StoreConfig::from_env();
    let migration_config = MigrationConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        backend = ?store_config.backend,
        batch_size = migration_config.batch_size,
        "Loaded server configuration"
    );

    // --- Stores ---
    let (legacy, target) = build_stores(&store_config).await;
    tracing::info!(legacy = %legacy.location(), target = %target.location(), "Stores ready");

    // --- CORS ---
    let cors = build_cors_layer(&config);

    // --- Event bus ---
    let event_bus = Arc::new(cutover_events::EventBus::default());
    let logger_handle = tokio::spawn(cutover_events::EventLogger::run(event_bus.subscribe()));
    tracing::info!("Event bus created");

    // --- Migration worker and job managers ---
    let worker_cancel = CancellationToken::new();
    let (state, worker_handle) = AppState::build(
        config.clone(),
        StateDeps {
            legacy,
            target,
            transform: Arc::new(IdentityTransform),
            host: Arc::new(SystemResources),
            event_bus: Arc::clone(&event_bus),
            migration_config,
        },
        worker_cancel.clone(),
    );
    tracing::info!("Migration worker started");

    match state.backups.cleanup_orphans().await {
        Ok(removed) => tracing::debug!(removed, "Orphaned backup scan finished"),
        Err(e) => tracing::warn!(error = %e, "Orphaned backup scan failed"),
    }

    // Spawn the expired-job sweeper.
    let sweeper_cancel = CancellationToken::new();
    let sweeper_handle = tokio::spawn(background::job_retention::run(
        state.backups.clone(),
        Duration::from_secs(config.job_sweep_interval_secs),
        sweeper_cancel.clone(),
    ));

    // --- Request ID header name ---
    let request_id_header = HeaderName::from_static("x-request-id");

    // --- Router ---
    let app = Router::new()
        // Health check at root level (not under /api/v1).
        .merge(routes::health::router())
        // API v1 routes.
        .nest("/api/v1", routes::api_routes())
        // -- Middleware stack (applied bottom-up) --
        // Panic recovery: catch panics and return 500 JSON.
        .layer(CatchPanicLayer::new())
        // Request timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        // Propagate request ID to response.
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        // Structured request/response tracing.
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Set request ID on incoming requests.
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        // CORS.
        .layer(cors)
        // Shared state.
        .with_state(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let grace = Duration::from_secs(config.shutdown_timeout_secs);

    sweeper_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), sweeper_handle).await;
    tracing::info!("Job retention sweeper stopped");

    // A running migration stops between batches; its state is not persisted.
    worker_cancel.cancel();
    if tokio::time::timeout(grace, worker_handle).await.is_err() {
        tracing::warn!("Migration worker did not stop within the shutdown timeout");
    }
    tracing::info!("Migration worker stopped");

    // The logger exits once every bus handle is gone; background jobs may
    // still hold one, so bound the wait.
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), logger_handle).await;

    tracing::info!("Graceful shutdown complete");
}

/// Build the legacy and new stores for the configured backend.
///
/// Panics on misconfiguration or an unreachable database; the server must
/// not start without its stores.
async fn build_stores(config: &StoreConfig) -> (Arc<dyn RecordStore>, Arc<dyn RecordStore>) {
    match config.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory stores; data is lost on restart");
            (
                Arc::new(MemoryStore::new("legacy")),
                Arc::new(MemoryStore::new("v2")),
            )
        }
        StoreBackend::Postgres => {
            let legacy_url = config
                .legacy_database_url
                .as_deref()
                .expect("LEGACY_DATABASE_URL must be set for the postgres backend");
            let target_url = config
                .target_database_url
                .as_deref()
                .unwrap_or(legacy_url);

            let legacy_pool = cutover_db::create_pool(legacy_url, config.db_max_connections)
                .await
                .expect("Failed to connect to legacy database");
            cutover_db::health_check(&legacy_pool)
                .await
                .expect("Legacy database health check failed");

            let target_pool = if target_url == legacy_url {
                legacy_pool.clone()
            } else {
                cutover_db::create_pool(target_url, config.db_max_connections)
                    .await
                    .expect("Failed to connect to target database")
            };
            tracing::info!("Database connection pools created");

            let legacy = PgRecordStore::new(legacy_pool, "legacy", &config.legacy_table_prefix)
                .expect("Invalid LEGACY_TABLE_PREFIX");
            let target = PgRecordStore::new(target_pool, "v2", &config.target_table_prefix)
                .expect("Invalid TARGET_TABLE_PREFIX");
            target
                .ensure_schema()
                .await
                .expect("Failed to create target tables");
            tracing::info!("Target schema ready");

            (Arc::new(legacy), Arc::new(target))
        }
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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

/// Build the CORS middleware layer from server configuration.
///
/// Panics at startup if any configured origin is invalid, which is the
/// desired behaviour -- we want misconfiguration to fail fast.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
