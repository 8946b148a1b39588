// logflume-pipeline - Batch consumer workers and DLQ routing
//
// Workers pull batches from their assigned partitions and drive the write
// pipeline: durable write on the critical path, index and broadcast as
// fire-and-forget side effects, DLQ on unrecoverable write failure, then
// offset commit. The commit happens whether the batch persisted or was
// dead-lettered; the authoritative store rejecting a batch must not wedge
// the partition.

mod consumer;
mod dlq;

pub use consumer::{ConsumerPool, ConsumerSettings};
pub use dlq::DlqRouter;
