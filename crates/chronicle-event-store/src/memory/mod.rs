//! In-memory backend.
//!
//! The event log is an arena: entries live in a contiguous `Vec` whose slot
//! index is `id - 1`, with hash indexes by aggregate and by committed
//! `(aggregate_uuid, version)`. All state sits behind `tokio` read/write
//! locks; writers hold the lock for a whole batch, which makes `append_all`
//! atomic.

mod event_log;
mod snapshot_repository;
mod transaction_repository;

pub use event_log::InMemoryEventLog;
pub use snapshot_repository::InMemorySnapshotRepository;
pub use transaction_repository::InMemoryTransactionRepository;
