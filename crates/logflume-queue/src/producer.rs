// Queue producer
//
// Publishes one record at a time so partitioning by service_id is
// preserved for batch submissions. Fire-and-forget from the caller's
// perspective: a publish failure is logged and counted, never surfaced
// back to the ingest acknowledgment.

use std::sync::Arc;

use metrics::counter;
use tracing::warn;

use logflume_core::{LogQueue, LogRecord};

/// Front-door producer for the logs topic.
#[derive(Clone)]
pub struct LogProducer {
    queue: Arc<dyn LogQueue>,
}

impl LogProducer {
    pub fn new(queue: Arc<dyn LogQueue>) -> Self {
        Self { queue }
    }

    /// Publish one record. The delivery outcome is recorded in counters;
    /// the caller's acknowledgment is not retracted on failure.
    pub async fn publish(&self, record: LogRecord) {
        let service_id = record.service_id.clone();
        match self.queue.publish(record).await {
            Ok((partition, offset)) => {
                counter!("logs.published.total", 1);
                tracing::trace!(service_id, partition, offset, "record published");
            }
            Err(err) => {
                counter!("logs.publish.failed.total", 1);
                warn!(service_id, error = %err, "failed to publish record");
            }
        }
    }

    /// Publish an already-validated batch record-by-record, preserving
    /// order per service.
    pub async fn publish_all(&self, records: Vec<LogRecord>) {
        for record in records {
            self.publish(record).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryTopic;
    use chrono::{TimeZone, Utc};
    use logflume_core::LogLevel;
    use std::time::Duration;

    fn record(service: &str, message: &str) -> LogRecord {
        LogRecord {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            service_id: service.to_string(),
            level: LogLevel::Info,
            message: message.to_string(),
            trace_id: None,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_publish_all_preserves_per_service_order() {
        let topic = Arc::new(MemoryTopic::new(2));
        let producer = LogProducer::new(topic.clone());

        producer
            .publish_all(vec![
                record("auth", "a0"),
                record("billing", "b0"),
                record("auth", "a1"),
            ])
            .await;

        let partition = topic.partition_for("auth");
        let batch = topic
            .poll(partition, 10, Duration::from_millis(10))
            .await
            .unwrap();
        let auth_messages: Vec<&str> = batch
            .records
            .iter()
            .filter(|r| r.service_id == "auth")
            .map(|r| r.message.as_str())
            .collect();
        assert_eq!(auth_messages, vec!["a0", "a1"]);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_panic() {
        let topic = Arc::new(MemoryTopic::new(1));
        topic.close();
        let producer = LogProducer::new(topic);
        // Failure is absorbed; the call completes normally.
        producer.publish(record("auth", "x")).await;
    }
}
