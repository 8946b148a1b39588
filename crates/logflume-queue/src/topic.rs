// In-memory partitioned topic
//
// Each partition is an append-only run of records with monotonic offsets.
// A single consumer worker polls a given partition, so ordering within a
// partition is preserved from publish through poll. Commit truncates the
// retained run; records are only dropped once committed.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use logflume_core::{LogQueue, LogRecord, PublishError, QueueBatch};

struct Partition {
    records: VecDeque<LogRecord>,
    /// Offset of `records.front()`.
    base_offset: u64,
    /// Offset the next published record receives.
    next_offset: u64,
    /// Offset the next poll starts from.
    fetch_offset: u64,
    /// One past the highest committed offset.
    committed: u64,
}

impl Partition {
    fn new() -> Self {
        Self {
            records: VecDeque::new(),
            base_offset: 0,
            next_offset: 0,
            fetch_offset: 0,
            committed: 0,
        }
    }
}

struct PartitionSlot {
    state: Mutex<Partition>,
    data_ready: Notify,
}

/// Reference `LogQueue` implementation: a single logical topic with a fixed
/// partition count, partitioned by `service_id`.
pub struct MemoryTopic {
    partitions: Vec<PartitionSlot>,
    closed: AtomicBool,
}

impl MemoryTopic {
    pub fn new(partitions: usize) -> Self {
        assert!(partitions > 0, "topic needs at least one partition");
        Self {
            partitions: (0..partitions)
                .map(|_| PartitionSlot {
                    state: Mutex::new(Partition::new()),
                    data_ready: Notify::new(),
                })
                .collect(),
            closed: AtomicBool::new(false),
        }
    }

    /// Stop accepting publishes. Polls keep draining what is already queued.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn partition_for(&self, service_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        service_id.hash(&mut hasher);
        (hasher.finish() % self.partitions.len() as u64) as usize
    }

    fn try_poll(&self, partition: usize, max_records: usize) -> Option<QueueBatch> {
        let slot = self.partitions.get(partition)?;
        let mut state = slot.state.lock();

        if state.fetch_offset >= state.next_offset {
            return None;
        }

        let start = (state.fetch_offset - state.base_offset) as usize;
        let available = state.records.len() - start;
        let count = available.min(max_records);

        let records: Vec<LogRecord> = state
            .records
            .iter()
            .skip(start)
            .take(count)
            .cloned()
            .collect();

        let first_offset = state.fetch_offset;
        state.fetch_offset += count as u64;

        Some(QueueBatch {
            partition,
            first_offset,
            last_offset: first_offset + count as u64 - 1,
            records,
        })
    }
}

#[async_trait]
impl LogQueue for MemoryTopic {
    fn partitions(&self) -> usize {
        self.partitions.len()
    }

    async fn publish(&self, record: LogRecord) -> Result<(usize, u64), PublishError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PublishError::Closed);
        }

        let partition = self.partition_for(&record.service_id);
        let slot = &self.partitions[partition];

        let offset = {
            let mut state = slot.state.lock();
            let offset = state.next_offset;
            state.next_offset += 1;
            state.records.push_back(record);
            offset
        };

        slot.data_ready.notify_one();
        Ok((partition, offset))
    }

    async fn poll(
        &self,
        partition: usize,
        max_records: usize,
        wait: Duration,
    ) -> Option<QueueBatch> {
        if let Some(batch) = self.try_poll(partition, max_records) {
            return Some(batch);
        }

        let slot = self.partitions.get(partition)?;
        let _ = tokio::time::timeout(wait, slot.data_ready.notified()).await;
        self.try_poll(partition, max_records)
    }

    async fn commit(&self, partition: usize, offset: u64) {
        let Some(slot) = self.partitions.get(partition) else {
            return;
        };
        let mut state = slot.state.lock();

        let committed = offset + 1;
        if committed <= state.committed {
            return;
        }
        state.committed = committed;
        if state.fetch_offset < committed {
            state.fetch_offset = committed;
        }
        while state.base_offset < committed && !state.records.is_empty() {
            state.records.pop_front();
            state.base_offset += 1;
        }
    }

    fn depth(&self, partition: usize) -> u64 {
        match self.partitions.get(partition) {
            Some(slot) => {
                let state = slot.state.lock();
                state.next_offset - state.committed
            }
            None => 0,
        }
    }

    async fn probe(&self) -> Result<(), PublishError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PublishError::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use logflume_core::LogLevel;

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
    async fn test_same_service_lands_on_same_partition() {
        let topic = MemoryTopic::new(3);
        let (p1, o1) = topic.publish(record("auth", "a")).await.unwrap();
        let (p2, o2) = topic.publish(record("auth", "b")).await.unwrap();
        assert_eq!(p1, p2);
        assert_eq!(o2, o1 + 1);
    }

    #[tokio::test]
    async fn test_poll_preserves_publish_order() {
        let topic = MemoryTopic::new(1);
        for i in 0..5 {
            topic.publish(record("auth", &format!("m{}", i))).await.unwrap();
        }

        let batch = topic.poll(0, 10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.first_offset, 0);
        assert_eq!(batch.last_offset, 4);
        let messages: Vec<&str> = batch.records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_poll_respects_max_records() {
        let topic = MemoryTopic::new(1);
        for i in 0..5 {
            topic.publish(record("auth", &format!("m{}", i))).await.unwrap();
        }

        let first = topic.poll(0, 2, Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.first_offset, 0);

        let second = topic.poll(0, 10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(second.first_offset, 2);
        assert_eq!(second.records.len(), 3);
    }

    #[tokio::test]
    async fn test_commit_truncates_and_tracks_depth() {
        let topic = MemoryTopic::new(1);
        for i in 0..4 {
            topic.publish(record("auth", &format!("m{}", i))).await.unwrap();
        }
        assert_eq!(topic.depth(0), 4);

        let batch = topic.poll(0, 10, Duration::from_millis(10)).await.unwrap();
        topic.commit(0, batch.last_offset).await;
        assert_eq!(topic.depth(0), 0);

        // Nothing left to poll
        assert!(topic.poll(0, 10, Duration::from_millis(5)).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_commit_is_ignored() {
        let topic = MemoryTopic::new(1);
        for i in 0..3 {
            topic.publish(record("auth", &format!("m{}", i))).await.unwrap();
        }
        let batch = topic.poll(0, 10, Duration::from_millis(10)).await.unwrap();
        topic.commit(0, batch.last_offset).await;
        topic.commit(0, 0).await;
        assert_eq!(topic.depth(0), 0);
    }

    #[tokio::test]
    async fn test_empty_poll_times_out() {
        let topic = MemoryTopic::new(1);
        assert!(topic.poll(0, 10, Duration::from_millis(5)).await.is_none());
    }

    #[tokio::test]
    async fn test_poll_wakes_on_publish() {
        let topic = std::sync::Arc::new(MemoryTopic::new(1));
        let waiter = {
            let topic = topic.clone();
            tokio::spawn(async move { topic.poll(0, 10, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        topic.publish(record("auth", "late")).await.unwrap();

        let batch = waiter.await.unwrap().unwrap();
        assert_eq!(batch.records.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_topic_rejects_publish() {
        let topic = MemoryTopic::new(1);
        topic.close();
        let err = topic.publish(record("auth", "x")).await.unwrap_err();
        assert!(matches!(err, PublishError::Closed));
    }

    #[tokio::test]
    async fn test_probe_reflects_topic_liveness() {
        let topic = MemoryTopic::new(1);
        assert!(topic.probe().await.is_ok());
        topic.close();
        assert!(matches!(topic.probe().await, Err(PublishError::Closed)));
    }
}
