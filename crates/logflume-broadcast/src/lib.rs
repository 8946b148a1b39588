// logflume-broadcast - Throttled realtime fan-out
//
// Subscribers receive batches of recently persisted records with bounded
// latency and bounded payload size, even under severe write load. If the
// sink cannot keep up, the sink sheds load, not the ingest pipeline: the
// pending queue is bounded and drops its oldest entry on overflow.
//
// Ownership rules: producers only enqueue, the single flush task only
// dequeues, and all queue state lives behind one mutex so the drop-oldest
// contract holds under concurrent enqueue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use logflume_core::{BroadcastSink, StoredRecord};

/// Policy levers, all configuration.
#[derive(Debug, Clone)]
pub struct BroadcastPolicy {
    pub enabled: bool,
    pub interval: Duration,
    /// Most records drained per flush tick.
    pub max_payload: usize,
    /// Bounded queue capacity.
    pub queue_cap: usize,
}

impl Default for BroadcastPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(250),
            max_payload: 250,
            queue_cap: 2_000,
        }
    }
}

/// Counter snapshot. The accounting identity
/// `queued == broadcast + dropped + currently_queued` holds after every
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastStats {
    pub queued: u64,
    pub broadcast: u64,
    pub dropped: u64,
    pub currently_queued: usize,
}

struct Inner {
    pending: VecDeque<StoredRecord>,
    enabled: bool,
    queued: u64,
    broadcast: u64,
    dropped: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    sink: Arc<dyn BroadcastSink>,
    policy: BroadcastPolicy,
}

impl Shared {
    /// Drain up to `max_payload` entries and hand them to the sink as one
    /// batch. Returns the number drained. On sink error the batch is not
    /// re-enqueued; a retry loop here could grow without bound.
    async fn flush_once(&self) -> usize {
        let batch: Vec<StoredRecord> = {
            let mut inner = self.inner.lock();
            let count = inner.pending.len().min(self.policy.max_payload);
            let drained: Vec<StoredRecord> = inner.pending.drain(..count).collect();
            inner.broadcast += drained.len() as u64;
            drained
        };

        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        counter!("broadcast.broadcast", count as u64);
        if let Err(err) = self.sink.deliver(batch).await {
            warn!(records = count, error = %err, "broadcast fan-out failed; batch dropped");
        }
        count
    }

    /// Clear the pending queue, accounting the entries as dropped.
    fn discard_pending(&self) {
        let mut inner = self.inner.lock();
        let count = inner.pending.len() as u64;
        if count > 0 {
            inner.pending.clear();
            inner.dropped += count;
            counter!("broadcast.dropped", count);
        }
    }
}

/// Throttled broadcaster with a bounded drop-oldest queue and a periodic
/// flush task.
pub struct Broadcaster {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl Broadcaster {
    pub fn new(policy: BroadcastPolicy, sink: Arc<dyn BroadcastSink>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    pending: VecDeque::new(),
                    enabled: policy.enabled,
                    queued: 0,
                    broadcast: 0,
                    dropped: 0,
                }),
                sink,
                policy,
            }),
            shutdown,
            flush_task: Mutex::new(None),
        }
    }

    /// Start the periodic flush task. Idempotent.
    pub fn start(&self) {
        let mut slot = self.flush_task.lock();
        if slot.is_some() {
            return;
        }

        let shared = self.shared.clone();
        let mut shutdown = self.shutdown.subscribe();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.policy.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let flushed = shared.flush_once().await;
                        if flushed > 0 {
                            debug!(flushed, "broadcast flush tick");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            // One final bounded flush, then drop whatever remains.
            shared.flush_once().await;
            shared.discard_pending();
        }));
    }

    /// Stop the flush task: one final flush of up to `max_payload` records,
    /// the remainder is dropped.
    pub async fn stop(&self) {
        let task = self.flush_task.lock().take();
        if let Some(task) = task {
            let _ = self.shutdown.send(true);
            let _ = task.await;
        }
    }

    /// Enqueue persisted records for the next flush tick. Non-blocking by
    /// construction: at capacity the oldest pending entry is dropped.
    pub fn enqueue(&self, records: &[StoredRecord]) {
        let mut inner = self.shared.inner.lock();
        if !inner.enabled {
            return;
        }

        let mut dropped = 0u64;
        for record in records {
            if inner.pending.len() >= self.shared.policy.queue_cap {
                inner.pending.pop_front();
                inner.dropped += 1;
                dropped += 1;
            }
            inner.pending.push_back(record.clone());
            inner.queued += 1;
        }

        counter!("broadcast.queued", records.len() as u64);
        if dropped > 0 {
            counter!("broadcast.dropped", dropped);
        }
    }

    /// Toggle fan-out. Disabling clears the pending queue (accounted as
    /// dropped); re-enabling replays nothing.
    pub fn set_enabled(&self, enabled: bool) {
        {
            let mut inner = self.shared.inner.lock();
            inner.enabled = enabled;
        }
        if !enabled {
            self.shared.discard_pending();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.inner.lock().enabled
    }

    pub fn stats(&self) -> BroadcastStats {
        let inner = self.shared.inner.lock();
        BroadcastStats {
            queued: inner.queued,
            broadcast: inner.broadcast,
            dropped: inner.dropped,
            currently_queued: inner.pending.len(),
        }
    }

    /// Flush immediately instead of waiting for the next tick. Used by
    /// tests and by the shutdown path.
    pub async fn flush_now(&self) -> usize {
        self.shared.flush_once().await
    }
}

/// Reference `BroadcastSink`: a tokio broadcast channel the external
/// framing layer subscribes to. Delivery with no subscribers is a no-op,
/// not an error.
pub struct ChannelSink {
    tx: broadcast::Sender<Vec<StoredRecord>>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<StoredRecord>> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl BroadcastSink for ChannelSink {
    async fn deliver(&self, records: Vec<StoredRecord>) -> anyhow::Result<()> {
        // A send error only means nobody is subscribed right now.
        let _ = self.tx.send(records);
        Ok(())
    }
}
