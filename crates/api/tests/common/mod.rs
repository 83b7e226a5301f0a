#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use cutover_core::migration::MigrationState;
use cutover_core::types::Collection;
use cutover_db::{MemoryStore, Record};
use cutover_migration::prerequisites::HostResources;
use cutover_migration::{IdentityTransform, MigrationConfig};
use http_body_util::BodyExt;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use cutover_api::config::ServerConfig;
use cutover_api::routes;
use cutover_api::state::{AppState, StateDeps};

/// Host resources reporting ample disk and memory.
pub struct PlentyResources;

#[async_trait]
impl HostResources for PlentyResources {
    async fn free_disk_bytes(&self, _path: &Path) -> io::Result<u64> {
        Ok(u64::MAX / 2)
    }

    async fn available_memory_bytes(&self) -> io::Result<u64> {
        Ok(8 * 1024 * 1024 * 1024)
    }
}

/// A running test application and handles on its in-memory stores.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub legacy: MemoryStore,
    pub target: MemoryStore,
    pub cancel: CancellationToken,
    /// Holds the backup and data directories alive for the test's duration.
    pub dir: TempDir,
}

impl TestApp {
    /// A fresh clone of the router, ready for `oneshot`.
    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config(dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        backup_dir: dir.join("backups"),
        job_retention_secs: 3600,
        job_sweep_interval_secs: 300,
    }
}

/// Build the full application over empty in-memory stores.
pub fn build_test_app() -> TestApp {
    build_test_app_with(MemoryStore::new("legacy"), MemoryStore::new("v2"))
}

/// Build the full application over the given stores.
pub fn build_test_app_with(legacy: MemoryStore, target: MemoryStore) -> TestApp {
    build_test_app_configured(legacy, target, |_| {})
}

/// Build the full application router with all middleware layers, using the
/// given stores and migration settings.
///
/// This mirrors the router construction in `main.rs` so integration tests
/// exercise the same middleware stack (CORS, request ID, timeout, tracing,
/// panic recovery) that production uses.
pub fn build_test_app_configured(
    legacy: MemoryStore,
    target: MemoryStore,
    configure: impl FnOnce(&mut MigrationConfig),
) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let cancel = CancellationToken::new();

    let mut migration_config = MigrationConfig {
        batch_size: 50,
        data_dir: dir.path().to_path_buf(),
        ..MigrationConfig::default()
    };
    configure(&mut migration_config);

    let (state, _worker) = AppState::build(
        config,
        StateDeps {
            legacy: Arc::new(legacy.clone()),
            target: Arc::new(target.clone()),
            transform: Arc::new(IdentityTransform),
            host: Arc::new(PlentyResources),
            event_bus: Arc::new(cutover_events::EventBus::default()),
            migration_config,
        },
        cancel.clone(),
    );

    let cors = CorsLayer::new()
        .allow_origin(["http://localhost:5173".parse().unwrap()])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    let router = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state.clone());

    TestApp {
        router,
        state,
        legacy,
        target,
        cancel,
        dir,
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Seed `count` records with ids `1..=count` into `collection`.
pub async fn seed(store: &MemoryStore, collection: Collection, count: u64) {
    store
        .seed(
            collection,
            (1..=count).map(|id| {
                Record::new(id, json!({ "label": format!("r{id}"), "score": id }))
            }),
        )
        .await;
}

/// Poll the migration status until it reaches `state`, or panic after ten
/// seconds.
pub async fn wait_for_state(app: &TestApp, state: MigrationState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let status = app.state.migration.status();
        if status.state == state {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {state}, last state {}",
            status.state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post(app: Router, uri: &str) -> Response {
    app.oneshot(Request::post(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    app.oneshot(
        Request::post(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn put_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    app.oneshot(
        Request::put(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn delete(app: Router, uri: &str) -> Response {
    app.oneshot(Request::delete(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
