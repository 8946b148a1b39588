// logflume-server - HTTP surface and process wiring
//
// Brings the pipeline up in dependency order (substrates, broadcaster,
// consumer workers, HTTP server) and tears it down in reverse: stop
// accepting ingest, drain the consumers so in-flight batches commit or
// dead-letter, flush the broadcaster once, then drop the clients.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use logflume_broadcast::{BroadcastPolicy, Broadcaster, ChannelSink};
use logflume_config::RuntimeConfig;
use logflume_core::{
    DurableStore, LogQueue, ResultCache, SearchStore, StoredRecord, ValidationError,
};
use logflume_index::{IndexWriter, MemorySearchIndex};
use logflume_pipeline::{ConsumerPool, ConsumerSettings, DlqRouter};
use logflume_queue::{LogProducer, MemoryDlq, MemoryTopic};
use logflume_search::{CachedSearch, MemoryResultCache, SearchService};
use logflume_store::MemoryLogStore;

mod handlers;
mod init;
pub mod telemetry;

pub use init::init_tracing;
pub use telemetry::{install_metrics, MetricsRegistry};

use handlers::{health_check, ingest_batch, ingest_record, metrics_snapshot, search_logs};

/// Application state shared across all requests.
#[derive(Clone)]
pub struct AppState {
    pub producer: LogProducer,
    pub search: Arc<CachedSearch>,
    pub store: Arc<dyn DurableStore>,
    pub search_store: Arc<dyn SearchStore>,
    pub cache: Arc<dyn ResultCache>,
    pub queue: Arc<dyn LogQueue>,
    pub max_batch_records: usize,
    pub max_payload_bytes: usize,
    pub registry: Arc<MetricsRegistry>,
}

/// Error type that implements IntoResponse.
pub(crate) enum AppError {
    Validation(ValidationError),
    Status(StatusCode, anyhow::Error),
}

impl AppError {
    pub fn with_status(status: StatusCode, error: anyhow::Error) -> Self {
        Self::Status(status, error)
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Status(StatusCode::INTERNAL_SERVER_ERROR, err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(err) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "validation failed",
                    "violations": err.violations,
                })),
            )
                .into_response(),
            AppError::Status(status, error) => {
                error!("Request error: {:?}", error);
                (
                    status,
                    Json(json!({
                        "error": error.to_string(),
                    })),
                )
                    .into_response()
            }
        }
    }
}

/// The assembled pipeline: substrates, broadcaster and consumer workers.
pub struct PipelineRuntime {
    state: AppState,
    topic: Arc<MemoryTopic>,
    pool: ConsumerPool,
    broadcaster: Arc<Broadcaster>,
    fan_out: Arc<ChannelSink>,
}

impl PipelineRuntime {
    /// Build every substrate and start the broadcaster and consumers.
    pub fn start(config: &RuntimeConfig, registry: Arc<MetricsRegistry>) -> Self {
        let topic = Arc::new(MemoryTopic::new(config.queue.partitions));
        let store = Arc::new(MemoryLogStore::new());
        let index = Arc::new(MemorySearchIndex::new());
        let dlq = Arc::new(MemoryDlq::new());
        let cache = Arc::new(MemoryResultCache::new(
            config.cache.ttl(),
            config.cache.max_entries,
        ));

        let fan_out = Arc::new(ChannelSink::new(64));
        let broadcaster = Arc::new(Broadcaster::new(
            BroadcastPolicy {
                enabled: config.broadcast.enabled,
                interval: config.broadcast.interval(),
                max_payload: config.broadcast.max_payload,
                queue_cap: config.broadcast.queue_cap,
            },
            fan_out.clone(),
        ));
        broadcaster.start();

        let pool = ConsumerPool::start(
            ConsumerSettings {
                workers: config.consumer.workers,
                poll_max_records: config.queue.poll_max_records,
                write_retry_attempts: config.consumer.write_retry_attempts,
                write_retry_backoff: config.consumer.write_retry_backoff(),
                write_timeout: config.consumer.write_timeout(),
            },
            topic.clone(),
            store.clone(),
            Arc::new(IndexWriter::new(index.clone())),
            DlqRouter::new(dlq.clone()),
            broadcaster.clone(),
        );

        let search_service = SearchService::new(
            index.clone(),
            store.clone(),
            config.search.query_timeout(),
        );
        let search = Arc::new(CachedSearch::new(search_service, cache.clone()));

        let state = AppState {
            producer: LogProducer::new(topic.clone()),
            search,
            store,
            search_store: index,
            cache,
            queue: topic.clone(),
            max_batch_records: config.ingest.max_batch_records,
            max_payload_bytes: config.ingest.max_payload_bytes,
            registry,
        };

        Self {
            state,
            topic,
            pool,
            broadcaster,
            fan_out,
        }
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Subscribe to the realtime fan-out channel. Subscribers receive
    /// arrays of records per flush tick; dropped records are not resent.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<StoredRecord>> {
        self.fan_out.subscribe()
    }

    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        self.broadcaster.clone()
    }

    /// Ordered teardown: refuse new publishes, drain the consumers, then
    /// stop the broadcaster with one final flush.
    pub async fn shutdown(self) {
        self.topic.close();
        self.pool.shutdown().await;
        self.broadcaster.stop().await;
        info!("pipeline shutdown complete");
    }
}

/// Build the HTTP router over the shared state.
pub fn router(state: AppState) -> Router {
    let max_payload_bytes = state.max_payload_bytes;
    Router::new()
        .route("/logs", post(ingest_record))
        .route("/logs/batch", post(ingest_batch))
        .route("/logs/search", get(search_logs))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_snapshot))
        .layer(axum::extract::DefaultBodyLimit::max(max_payload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Graceful shutdown handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

/// Entry point for server mode with an already-loaded config.
pub async fn run_with_config(config: RuntimeConfig) -> Result<()> {
    init_tracing(&config);
    let registry = install_metrics();

    info!("log aggregation pipeline starting");
    info!(
        partitions = config.queue.partitions,
        workers = config.consumer.workers,
        broadcast_enabled = config.broadcast.enabled,
        "pipeline configuration"
    );

    let runtime = PipelineRuntime::start(&config, registry);
    let app = router(runtime.state());

    let addr = config.server.listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind to {}", addr))?;

    info!("HTTP endpoint listening on http://{}", addr);
    info!("Routes:");
    info!("  POST http://{}/logs        - single-record ingest", addr);
    info!("  POST http://{}/logs/batch  - batch ingest", addr);
    info!("  GET  http://{}/logs/search - filtered search", addr);
    info!("  GET  http://{}/health      - dependency liveness", addr);
    info!("  GET  http://{}/metrics     - counter snapshot", addr);
    info!("Press Ctrl+C or send SIGTERM to stop");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Ingest has stopped; drain the write side before exiting.
    runtime.shutdown().await;
    info!("Server shutdown complete");

    Ok(())
}

/// Entry point for server mode: load config, then run.
pub async fn run() -> Result<()> {
    let config = RuntimeConfig::load().context("Failed to load configuration")?;
    run_with_config(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.queue.partitions = 2;
        config.consumer.workers = 2;
        config
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn test_ingest_record_is_accepted_then_persisted() {
        let runtime = PipelineRuntime::start(&test_config(), Arc::new(MetricsRegistry::default()));
        let app = router(runtime.state());

        let response = app
            .oneshot(post_json(
                "/logs",
                serde_json::json!({
                    "timestamp": "2025-01-01T00:00:00Z",
                    "serviceId": "auth",
                    "level": "INFO",
                    "message": "ok",
                    "traceId": "t1",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let queue = runtime.state().queue.clone();
        eventually(move || (0..queue.partitions()).all(|p| queue.depth(p) == 0)).await;

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_ingest_rejects_invalid_record_with_field_violations() {
        let runtime = PipelineRuntime::start(&test_config(), Arc::new(MetricsRegistry::default()));
        let app = router(runtime.state());

        let response = app
            .oneshot(post_json(
                "/logs",
                serde_json::json!({
                    "serviceId": "",
                    "level": "FATAL",
                    "message": "x",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        let fields: Vec<&str> = body["violations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["field"].as_str().unwrap())
            .collect();
        assert!(fields.contains(&"timestamp"));
        assert!(fields.contains(&"serviceId"));
        assert!(fields.contains(&"level"));

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_batch_is_accepted_noop() {
        let runtime = PipelineRuntime::start(&test_config(), Arc::new(MetricsRegistry::default()));
        let app = router(runtime.state());

        let response = app
            .oneshot(post_json("/logs/batch", serde_json::json!([])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["count"], 0);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected() {
        let mut config = test_config();
        config.ingest.max_batch_records = 2;
        let runtime = PipelineRuntime::start(&config, Arc::new(MetricsRegistry::default()));
        let app = router(runtime.state());

        let record = serde_json::json!({
            "timestamp": "2025-01-01T00:00:00Z",
            "serviceId": "auth",
            "level": "INFO",
            "message": "ok",
        });
        let response = app
            .oneshot(post_json(
                "/logs/batch",
                serde_json::json!([record.clone(), record.clone(), record]),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_search_round_trip_over_http() {
        let runtime = PipelineRuntime::start(&test_config(), Arc::new(MetricsRegistry::default()));
        let app = router(runtime.state());

        let records: Vec<serde_json::Value> = (0..6)
            .map(|i| {
                serde_json::json!({
                    "timestamp": format!("2025-01-01T00:00:{:02}Z", i),
                    "serviceId": "auth",
                    "level": if i % 2 == 0 { "INFO" } else { "ERROR" },
                    "message": format!("login event {}", i),
                })
            })
            .collect();
        let response = app
            .clone()
            .oneshot(post_json("/logs/batch", serde_json::json!(records)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // Wait for the async index hand-off to land. The warm-up probe uses
        // a different page size so its cache entry cannot shadow the
        // assertion query below.
        let mut indexed = false;
        for attempt in 0..200 {
            // Vary the page size so each probe has its own cache key and a
            // partial result cached early cannot mask later progress.
            let uri = format!("/logs/search?serviceId=auth&level=ERROR&size={}", 100 + attempt);
            let probe = app.clone().oneshot(get(&uri)).await.unwrap();
            let body = body_json(probe).await;
            if body["totalElements"] == 3 {
                indexed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(indexed, "records were not indexed within 2s");

        let response = app
            .oneshot(get("/logs/search?serviceId=auth&level=ERROR&size=2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["totalElements"], 3);
        assert_eq!(body["logs"].as_array().unwrap().len(), 2);
        assert_eq!(body["levelCounts"]["ERROR"], 3);
        assert_eq!(body["aggregationScope"], "full");

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_search_rejects_bad_level() {
        let runtime = PipelineRuntime::start(&test_config(), Arc::new(MetricsRegistry::default()));
        let app = router(runtime.state());

        let response = app
            .oneshot(get("/logs/search?level=LOUD"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_reports_dependencies() {
        let runtime = PipelineRuntime::start(&test_config(), Arc::new(MetricsRegistry::default()));
        let app = router(runtime.state());

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["dependencies"]["durableStore"]["status"], "ok");
        assert_eq!(body["dependencies"]["searchStore"]["status"], "ok");
        assert_eq!(body["dependencies"]["cache"]["status"], "ok");
        assert_eq!(body["dependencies"]["queue"]["status"], "ok");
        assert_eq!(body["dependencies"]["queue"]["depth"], 0);
        assert!(body["dependencies"]["queue"]["probeLatencyMs"].is_u64());

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_goes_down_when_queue_probe_fails() {
        let runtime = PipelineRuntime::start(&test_config(), Arc::new(MetricsRegistry::default()));
        let app = router(runtime.state());

        // Shutdown closes the topic; the surviving state clone still routes
        // health checks, which must now report the queue as down.
        runtime.shutdown().await;

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_json(response).await;
        assert_eq!(body["status"], "down");
        assert_eq!(body["dependencies"]["queue"]["status"], "down");
        // The other dependencies are still healthy; the queue alone drags
        // the overall status down.
        assert_eq!(body["dependencies"]["durableStore"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_metrics_snapshot_endpoint() {
        let runtime = PipelineRuntime::start(&test_config(), Arc::new(MetricsRegistry::default()));
        let app = router(runtime.state());

        let response = app.oneshot(get("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert!(body.get("counters").is_some());
        assert!(body.get("timers").is_some());

        runtime.shutdown().await;
    }
}
