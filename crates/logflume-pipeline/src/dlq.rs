// DLQ router
//
// Wraps each record of a failed batch in a diagnostic envelope and
// publishes it to the side channel. Publish failures are logged and
// swallowed: the router is off the critical path and must never block
// offset commit.

use std::sync::Arc;

use metrics::counter;
use tracing::{error, warn};

use logflume_core::{DlqEnvelope, DlqSink, QueueBatch, StoreError};

#[derive(Clone)]
pub struct DlqRouter {
    sink: Arc<dyn DlqSink>,
}

impl DlqRouter {
    pub fn new(sink: Arc<dyn DlqSink>) -> Self {
        Self { sink }
    }

    /// Route every record of a failed batch, preserving batch order.
    pub async fn route_batch(&self, batch: &QueueBatch, cause: &StoreError) {
        error!(
            partition = batch.partition,
            records = batch.len(),
            kind = cause.kind(),
            error = %cause,
            "routing failed batch to dead-letter queue"
        );

        for (index, record) in batch.records.iter().enumerate() {
            let envelope = DlqEnvelope::new(
                record.clone(),
                cause.kind(),
                cause.to_string(),
                batch.partition,
                batch.offset_of(index),
            );

            match self.sink.publish(envelope).await {
                Ok(()) => counter!("logs.dlq.total", 1),
                Err(err) => {
                    counter!("logs.dlq.publish.failed.total", 1);
                    warn!(
                        partition = batch.partition,
                        offset = batch.offset_of(index),
                        error = %err,
                        "failed to publish DLQ envelope; record lost"
                    );
                }
            }
        }
    }
}
