// Dead-letter side channel
//
// A separate topic never consumed by the pipeline. Operators drain it
// out-of-band; tests read it to assert routing behavior.

use async_trait::async_trait;
use parking_lot::Mutex;

use logflume_core::{DlqEnvelope, DlqSink, PublishError};

/// Reference `DlqSink`: an unbounded in-memory envelope list.
#[derive(Default)]
pub struct MemoryDlq {
    envelopes: Mutex<Vec<DlqEnvelope>>,
}

impl MemoryDlq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.envelopes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain everything, oldest first. Operator-facing; the pipeline never
    /// calls this.
    pub fn drain(&self) -> Vec<DlqEnvelope> {
        std::mem::take(&mut *self.envelopes.lock())
    }

    pub fn snapshot(&self) -> Vec<DlqEnvelope> {
        self.envelopes.lock().clone()
    }
}

#[async_trait]
impl DlqSink for MemoryDlq {
    async fn publish(&self, envelope: DlqEnvelope) -> Result<(), PublishError> {
        self.envelopes.lock().push(envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use logflume_core::{LogLevel, LogRecord};

    fn envelope(message: &str, offset: u64) -> DlqEnvelope {
        DlqEnvelope::new(
            LogRecord {
                timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
                service_id: "auth".to_string(),
                level: LogLevel::Error,
                message: message.to_string(),
                trace_id: None,
                metadata: Default::default(),
            },
            "TransientStoreError",
            "conn reset",
            0,
            offset,
        )
    }

    #[tokio::test]
    async fn test_publish_and_drain() {
        let dlq = MemoryDlq::new();
        dlq.publish(envelope("a", 0)).await.unwrap();
        dlq.publish(envelope("b", 1)).await.unwrap();
        assert_eq!(dlq.len(), 2);

        let drained = dlq.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].record.message, "a");
        assert!(dlq.is_empty());
    }
}
