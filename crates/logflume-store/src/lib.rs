// logflume-store - Authoritative record store
//
// Reference DurableStore implementation: an append-only in-memory table
// with monotonic id assignment. It is the system of record; the search
// store and the broadcaster derive from its output. A SQL-backed
// deployment implements the same trait against one indexed table.

mod memory;

pub use memory::MemoryLogStore;
