// logflume-index - Search store and index writer
//
// The memory index is the reference SearchStore: keyword term filters,
// an analyzed match on message, and full-set aggregations answered in one
// call. The index writer drives best-effort bulk indexing and never raises
// to the consumer.

mod memory;
mod writer;

pub use memory::MemorySearchIndex;
pub use writer::IndexWriter;
