// logflume-queue - Partitioned queue substrate and producer
//
// The in-memory topic is the reference implementation of the LogQueue
// capability: append-only partitions with monotonic offsets, at-least-once
// delivery, and commit-based truncation. A broker-backed deployment swaps
// this crate's substrate without touching the consumer.

mod dlq;
mod producer;
mod topic;

pub use dlq::MemoryDlq;
pub use producer::LogProducer;
pub use topic::MemoryTopic;
