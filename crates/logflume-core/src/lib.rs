// logflume-core - Shared domain model for the log pipeline
//
// This crate contains the record model and validator, the search
// request/result model, the error taxonomy, and the capability traits
// every substrate (queue, durable store, search store, cache) implements.
// No I/O and no runtime wiring; those live in the substrate crates.

pub mod batch;
pub mod error;
pub mod record;
pub mod search;
pub mod stores;

pub use batch::{DlqEnvelope, QueueBatch};
pub use error::{
    CacheError, FieldViolation, PublishError, SearchBackendError, StoreError, ValidationError,
};
pub use record::{LogLevel, LogRecord, RecordDraft, StoredRecord};
pub use search::{AggregationScope, SearchRequest, SearchResult};
pub use stores::{
    BroadcastSink, DlqSink, DurableStore, FallbackPage, LogQueue, ResultCache, SearchDocument,
    SearchHits, SearchStore,
};
