// HTTP request handlers
//
// Ingest acknowledges with 202 once validation passes and the records are
// handed to the producer; durability happens downstream and a 202 is not
// proof of persistence. Search goes through the cached front door. Health
// probes every backing dependency with a measured latency.

use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use logflume_core::search::DEFAULT_PAGE_SIZE;
use logflume_core::{
    DurableStore, LogLevel, LogQueue, RecordDraft, ResultCache, SearchRequest, SearchStore,
    ValidationError,
};
use logflume_search::SearchError;

use crate::{AppError, AppState};

/// Probe latency above this is reported as `warn` instead of `ok`.
const PROBE_WARN_MS: u64 = 250;

/// POST /logs - single-record ingest
pub(crate) async fn ingest_record(
    State(state): State<AppState>,
    Json(draft): Json<RecordDraft>,
) -> Result<Response, AppError> {
    let start = Instant::now();
    counter!("ingest.requests", 1);

    let record = draft.validate().map_err(AppError::Validation)?;
    state.producer.publish(record).await;

    histogram!(
        "ingest.accept.latency_ms",
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "count": 1})),
    )
        .into_response())
}

/// POST /logs/batch - ordered batch ingest
pub(crate) async fn ingest_batch(
    State(state): State<AppState>,
    Json(drafts): Json<Vec<RecordDraft>>,
) -> Result<Response, AppError> {
    let start = Instant::now();
    counter!("ingest.requests", 1);

    if drafts.len() > state.max_batch_records {
        return Err(AppError::Validation(ValidationError::single(
            "batch",
            format!("must not exceed {} records", state.max_batch_records),
        )));
    }

    // An empty batch is acknowledged and is a no-op.
    if drafts.is_empty() {
        return Ok((
            StatusCode::ACCEPTED,
            Json(json!({"status": "accepted", "count": 0})),
        )
            .into_response());
    }

    let mut records = Vec::with_capacity(drafts.len());
    let mut violations = Vec::new();
    for (index, draft) in drafts.into_iter().enumerate() {
        match draft.validate() {
            Ok(record) => records.push(record),
            Err(err) => {
                for violation in err.violations {
                    violations.push(logflume_core::FieldViolation::new(
                        format!("records[{}].{}", index, violation.field),
                        violation.message,
                    ));
                }
            }
        }
    }

    if !violations.is_empty() {
        return Err(AppError::Validation(ValidationError::new(violations)));
    }

    let count = records.len();
    state.producer.publish_all(records).await;

    histogram!(
        "ingest.accept.latency_ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
    debug!(count, "batch accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "count": count})),
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct SearchParams {
    service_id: Option<String>,
    level: Option<String>,
    trace_id: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    query: Option<String>,
    page: Option<usize>,
    size: Option<usize>,
}

impl SearchParams {
    fn into_request(self) -> Result<SearchRequest, ValidationError> {
        let level = match self.level.as_deref() {
            Some(raw) => Some(
                raw.parse::<LogLevel>()
                    .map_err(|err| ValidationError::single("level", err))?,
            ),
            None => None,
        };

        Ok(SearchRequest {
            service_id: self.service_id,
            level,
            trace_id: self.trace_id,
            start_time: self.start_time,
            end_time: self.end_time,
            query: self.query,
            page: self.page.unwrap_or(0),
            size: self.size.unwrap_or(DEFAULT_PAGE_SIZE),
        })
    }
}

/// GET /logs/search - filtered, paginated search with aggregations
pub(crate) async fn search_logs(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, AppError> {
    let request = params.into_request().map_err(AppError::Validation)?;

    match state.search.search(&request).await {
        Ok(result) => Ok((StatusCode::OK, Json(result)).into_response()),
        Err(SearchError::Validation(err)) => Err(AppError::Validation(err)),
        Err(SearchError::Unavailable(msg)) => Err(AppError::with_status(
            StatusCode::SERVICE_UNAVAILABLE,
            anyhow::anyhow!(msg),
        )),
    }
}

/// GET /health - liveness of every backing dependency
pub(crate) async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (store_status, store_ms) = probe_latency(state.store.probe()).await;
    let (index_status, index_ms) = probe_latency(state.search_store.probe()).await;
    let (cache_status, cache_ms) = probe_latency(state.cache.probe()).await;
    let (queue_status, queue_ms) = probe_latency(state.queue.probe()).await;

    let queue_depth: u64 = (0..state.queue.partitions())
        .map(|p| state.queue.depth(p))
        .sum();

    let statuses = [store_status, index_status, cache_status, queue_status];
    let overall = if statuses.contains(&"down") {
        "down"
    } else if statuses.contains(&"warn") {
        "warn"
    } else {
        "ok"
    };

    let code = if overall == "down" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(json!({
            "status": overall,
            "dependencies": {
                "durableStore": {"status": store_status, "probeLatencyMs": store_ms},
                "searchStore": {"status": index_status, "probeLatencyMs": index_ms},
                "cache": {"status": cache_status, "probeLatencyMs": cache_ms},
                "queue": {"status": queue_status, "probeLatencyMs": queue_ms, "depth": queue_depth},
            },
        })),
    )
}

async fn probe_latency<E>(
    probe: impl std::future::Future<Output = Result<(), E>>,
) -> (&'static str, u64) {
    let start = Instant::now();
    let outcome = probe.await;
    let latency_ms = start.elapsed().as_millis() as u64;

    let status = match outcome {
        Ok(()) if latency_ms > PROBE_WARN_MS => "warn",
        Ok(()) => "ok",
        Err(_) => "down",
    };
    (status, latency_ms)
}

/// GET /metrics - counter and timer snapshot
pub(crate) async fn metrics_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.registry.snapshot()))
}
