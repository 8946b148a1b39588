// Queue batch and dead-letter envelope types
//
// A QueueBatch is the unit of transactional persistence and of DLQ routing:
// an ordered run of records from one partition plus the offset to commit
// once the batch is either persisted or dead-lettered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::LogRecord;

/// An ordered run of records pulled from a single queue partition.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueBatch {
    pub partition: usize,
    /// Offset of the first record in the batch.
    pub first_offset: u64,
    /// Highest offset covered by the batch; committing this offset marks
    /// the whole batch as handled.
    pub last_offset: u64,
    pub records: Vec<LogRecord>,
}

impl QueueBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Queue offset of the record at `index` within this batch.
    pub fn offset_of(&self, index: usize) -> u64 {
        self.first_offset + index as u64
    }
}

/// A failed record plus the diagnostics an operator needs to drain it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqEnvelope {
    pub record: LogRecord,
    /// Stable error kind, e.g. `TransientStoreError`.
    pub error_kind: String,
    pub error_message: String,
    pub partition: usize,
    pub offset: u64,
    pub failed_at: DateTime<Utc>,
}

impl DlqEnvelope {
    pub fn new(
        record: LogRecord,
        error_kind: impl Into<String>,
        error_message: impl Into<String>,
        partition: usize,
        offset: u64,
    ) -> Self {
        Self {
            record,
            error_kind: error_kind.into(),
            error_message: error_message.into(),
            partition,
            offset,
            failed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogLevel;
    use chrono::TimeZone;

    fn record(message: &str) -> LogRecord {
        LogRecord {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            service_id: "auth".to_string(),
            level: LogLevel::Info,
            message: message.to_string(),
            trace_id: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_offset_of_is_contiguous() {
        let batch = QueueBatch {
            partition: 1,
            first_offset: 40,
            last_offset: 42,
            records: vec![record("a"), record("b"), record("c")],
        };
        assert_eq!(batch.offset_of(0), 40);
        assert_eq!(batch.offset_of(2), 42);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_envelope_carries_diagnostics() {
        let env = DlqEnvelope::new(record("boom"), "TransientStoreError", "conn reset", 2, 17);
        assert_eq!(env.error_kind, "TransientStoreError");
        assert_eq!(env.partition, 2);
        assert_eq!(env.offset, 17);

        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("errorKind").is_some());
        assert!(json.get("failedAt").is_some());
    }
}
