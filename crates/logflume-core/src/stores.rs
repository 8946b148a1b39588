// Capability traits for the pipeline's substrates
//
// Each substrate exposes a small method set; the concrete products behind
// them (broker, SQL store, search engine, cache server) are deployment
// choices. Test doubles implement the same traits.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::batch::{DlqEnvelope, QueueBatch};
use crate::error::{CacheError, PublishError, SearchBackendError, StoreError};
use crate::record::{LogLevel, LogRecord, StoredRecord};
use crate::search::{SearchRequest, SearchResult};

/// Document shape held by the search store. `record_id` is a foreign key
/// into the authoritative store; it is absent only when id correlation
/// failed during indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
    pub service_id: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl From<&StoredRecord> for SearchDocument {
    fn from(stored: &StoredRecord) -> Self {
        Self {
            record_id: Some(stored.record_id),
            received_at: Some(stored.received_at),
            timestamp: stored.record.timestamp,
            service_id: stored.record.service_id.clone(),
            level: stored.record.level,
            message: stored.record.message.clone(),
            trace_id: stored.record.trace_id.clone(),
            metadata: stored.record.metadata.clone(),
        }
    }
}

impl SearchDocument {
    /// Document without an authoritative id; indexed with a warning when
    /// correlation fails.
    pub fn uncorrelated(record: &LogRecord) -> Self {
        Self {
            record_id: None,
            received_at: None,
            timestamp: record.timestamp,
            service_id: record.service_id.clone(),
            level: record.level,
            message: record.message.clone(),
            trace_id: record.trace_id.clone(),
            metadata: record.metadata.clone(),
        }
    }
}

/// One page of search hits plus aggregations over the entire filter match.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHits {
    pub documents: Vec<SearchDocument>,
    pub total: u64,
    pub level_counts: BTreeMap<String, u64>,
    pub service_counts: BTreeMap<String, u64>,
}

/// One page from the authoritative store's fallback query. Aggregations are
/// not included; the search service derives page-scoped counts itself.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackPage {
    pub records: Vec<StoredRecord>,
    pub total: u64,
}

/// The system of record. Assigns `record_id` and `received_at`; nothing
/// else in the pipeline may write either field.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Atomically persist a batch: either every record is stored with an id
    /// assigned, or none are and the error describes why.
    async fn write_batch(&self, records: Vec<LogRecord>) -> Result<Vec<StoredRecord>, StoreError>;

    /// Fallback read path: equivalent filters to the search store with
    /// case-insensitive substring matching for free text.
    async fn query(&self, request: &SearchRequest) -> Result<FallbackPage, StoreError>;

    /// Cheap liveness probe for the health surface.
    async fn probe(&self) -> Result<(), StoreError>;
}

/// The inverted-index store used for filtering and aggregation.
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Best-effort bulk upsert tuned for throughput; idempotent under the
    /// document identity used by the index writer.
    async fn index_batch(&self, documents: Vec<SearchDocument>) -> Result<(), SearchBackendError>;

    /// One round trip answering the requested page and both full-set
    /// aggregations.
    async fn search(&self, request: &SearchRequest) -> Result<SearchHits, SearchBackendError>;

    async fn probe(&self) -> Result<(), SearchBackendError>;
}

/// Look-aside result cache keyed by the canonical request serialization.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<SearchResult>, CacheError>;

    async fn put(&self, key: &str, result: &SearchResult) -> Result<(), CacheError>;

    async fn probe(&self) -> Result<(), CacheError>;
}

/// Side channel for records the pipeline cannot persist. Never consumed by
/// the pipeline itself; operators drain it out-of-band.
#[async_trait]
pub trait DlqSink: Send + Sync {
    async fn publish(&self, envelope: DlqEnvelope) -> Result<(), PublishError>;
}

/// Partitioned queue between ingest and the consumer workers. Offsets are
/// owned by the substrate; only the consumer commits them.
#[async_trait]
pub trait LogQueue: Send + Sync {
    fn partitions(&self) -> usize;

    /// Append one record to the partition derived from its `service_id`,
    /// returning `(partition, offset)`.
    async fn publish(&self, record: LogRecord) -> Result<(usize, u64), PublishError>;

    /// Pull the next uncommitted run of records from one partition, waiting
    /// up to `wait` for data before returning `None`.
    async fn poll(
        &self,
        partition: usize,
        max_records: usize,
        wait: std::time::Duration,
    ) -> Option<QueueBatch>;

    /// Mark every offset up to and including `offset` as handled.
    async fn commit(&self, partition: usize, offset: u64);

    /// Uncommitted record count, for lag metrics and health.
    fn depth(&self, partition: usize) -> u64;

    /// Cheap liveness probe for the health surface.
    async fn probe(&self) -> Result<(), PublishError>;
}

/// External fan-out layer the broadcaster hands flushed batches to.
/// Subscribers receive arrays of records per flush tick.
#[async_trait]
pub trait BroadcastSink: Send + Sync {
    async fn deliver(&self, records: Vec<StoredRecord>) -> anyhow::Result<()>;
}
