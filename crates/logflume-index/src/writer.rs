// Best-effort index writer
//
// Correlates each input record to its authoritative record_id by
// (service_id, timestamp). A record that fails correlation is still
// indexed, with a null record_id and a warning. The writer never raises to
// the consumer: failures are logged and counted and the pipeline moves on.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::warn;

use logflume_core::{LogRecord, SearchDocument, SearchStore, StoredRecord};

pub struct IndexWriter {
    search: Arc<dyn SearchStore>,
}

impl IndexWriter {
    pub fn new(search: Arc<dyn SearchStore>) -> Self {
        Self { search }
    }

    /// Bulk-index a persisted batch. `records` is the batch as pulled from
    /// the queue; `persisted` is the durable writer's output for it.
    pub async fn index_batch(&self, records: &[LogRecord], persisted: &[StoredRecord]) {
        if records.is_empty() {
            return;
        }

        let by_key: HashMap<(&str, DateTime<Utc>), &StoredRecord> = persisted
            .iter()
            .map(|s| ((s.record.service_id.as_str(), s.record.timestamp), s))
            .collect();

        let documents: Vec<SearchDocument> = records
            .iter()
            .map(|record| {
                match by_key.get(&(record.service_id.as_str(), record.timestamp)) {
                    Some(stored) => SearchDocument::from(*stored),
                    None => {
                        warn!(
                            service_id = %record.service_id,
                            timestamp = %record.timestamp,
                            "no persisted row correlates; indexing without record id"
                        );
                        SearchDocument::uncorrelated(record)
                    }
                }
            })
            .collect();

        let count = documents.len();
        match self.search.index_batch(documents).await {
            Ok(()) => {
                counter!("index.documents.total", count as u64);
            }
            Err(err) => {
                counter!("index.failed.total", 1);
                warn!(error = %err, records = count, "bulk index failed; batch dropped");
            }
        }
    }
}
