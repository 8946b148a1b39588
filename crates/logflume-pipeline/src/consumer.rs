// Batch consumer workers
//
// Each worker owns a disjoint set of partitions (round-robin assignment)
// and pulls one batch at a time, so per-partition order is preserved from
// publish through persistence. The durable write is the only synchronous
// step; index and broadcast hand-offs never touch the commit path, and the
// spawned index task must not capture it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use logflume_broadcast::Broadcaster;
use logflume_core::{DurableStore, LogQueue, LogRecord, QueueBatch, StoreError, StoredRecord};
use logflume_index::IndexWriter;

use crate::dlq::DlqRouter;

/// How long an idle worker waits on one partition before moving on.
const POLL_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub workers: usize,
    pub poll_max_records: usize,
    /// Total durable-write attempts per batch; only transient errors retry.
    pub write_retry_attempts: u32,
    pub write_retry_backoff: Duration,
    pub write_timeout: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            workers: 3,
            poll_max_records: 500,
            write_retry_attempts: 2,
            write_retry_backoff: Duration::from_millis(100),
            write_timeout: Duration::from_secs(5),
        }
    }
}

struct WorkerContext {
    settings: ConsumerSettings,
    queue: Arc<dyn LogQueue>,
    store: Arc<dyn DurableStore>,
    index_writer: Arc<IndexWriter>,
    dlq: DlqRouter,
    broadcaster: Arc<Broadcaster>,
}

/// Handle to the running worker set.
pub struct ConsumerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl ConsumerPool {
    /// Spawn the configured number of workers. Partitions are assigned
    /// round-robin; a worker with no partitions exits immediately.
    pub fn start(
        settings: ConsumerSettings,
        queue: Arc<dyn LogQueue>,
        store: Arc<dyn DurableStore>,
        index_writer: Arc<IndexWriter>,
        dlq: DlqRouter,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let partitions = queue.partitions();
        let workers = settings.workers.min(partitions).max(1);

        let context = Arc::new(WorkerContext {
            settings,
            queue,
            store,
            index_writer,
            dlq,
            broadcaster,
        });

        let handles = (0..workers)
            .map(|worker| {
                let assigned: Vec<usize> =
                    (worker..partitions).step_by(workers).collect();
                info!(worker, partitions = ?assigned, "starting consumer worker");
                let context = context.clone();
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(run_worker(worker, assigned, context, shutdown_rx))
            })
            .collect();

        Self { handles, shutdown }
    }

    /// Signal shutdown and wait for every worker. Workers finish the batch
    /// they are on and exit at the next commit boundary.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn run_worker(
    worker: usize,
    partitions: Vec<usize>,
    context: Arc<WorkerContext>,
    shutdown: watch::Receiver<bool>,
) {
    'outer: loop {
        for &partition in &partitions {
            if *shutdown.borrow() {
                break 'outer;
            }

            let batch = context
                .queue
                .poll(partition, context.settings.poll_max_records, POLL_WAIT)
                .await;

            if let Some(batch) = batch {
                process_batch(&context, batch).await;
            }
        }
    }
    info!(worker, "consumer worker stopped");
}

/// Drive one batch through the pipeline: durable write, then the
/// non-critical index/broadcast hand-offs, then offset commit. The offset
/// is committed even when the batch is dead-lettered; redelivering a batch
/// the store has rejected would loop forever.
async fn process_batch(context: &WorkerContext, batch: QueueBatch) {
    let start = Instant::now();

    match write_with_retry(context, &batch.records).await {
        Ok(persisted) => {
            counter!("logs.consumed.total", persisted.len() as u64);
            spawn_index_task(context, &batch.records, &persisted);
            context.broadcaster.enqueue(&persisted);
            debug!(
                partition = batch.partition,
                records = persisted.len(),
                "batch persisted"
            );
        }
        Err(err) => {
            context.dlq.route_batch(&batch, &err).await;
        }
    }

    context.queue.commit(batch.partition, batch.last_offset).await;
    histogram!(
        "consumer.batch.duration_ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
}

/// Hand the persisted batch to the index writer on the shared runtime.
/// The task owns its inputs; failures are handled inside the writer.
fn spawn_index_task(context: &WorkerContext, records: &[LogRecord], persisted: &[StoredRecord]) {
    let writer = context.index_writer.clone();
    let records = records.to_vec();
    let persisted = persisted.to_vec();
    tokio::spawn(async move {
        writer.index_batch(&records, &persisted).await;
    });
}

async fn write_with_retry(
    context: &WorkerContext,
    records: &[LogRecord],
) -> Result<Vec<StoredRecord>, StoreError> {
    let attempts = context.settings.write_retry_attempts.max(1);

    let mut last_error = StoreError::Transient("write not attempted".to_string());
    for attempt in 1..=attempts {
        let write = context.store.write_batch(records.to_vec());
        let result = match tokio::time::timeout(context.settings.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Transient(format!(
                "durable write exceeded {:?}",
                context.settings.write_timeout
            ))),
        };

        match result {
            Ok(persisted) => return Ok(persisted),
            Err(err) => {
                let retryable = err.is_transient() && attempt < attempts;
                warn!(
                    attempt,
                    attempts,
                    retryable,
                    kind = err.kind(),
                    error = %err,
                    "durable write failed"
                );
                last_error = err;
                if !retryable {
                    break;
                }
                tokio::time::sleep(context.settings.write_retry_backoff).await;
            }
        }
    }

    Err(last_error)
}
