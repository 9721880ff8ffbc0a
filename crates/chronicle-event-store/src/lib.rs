//! Chronicle event store — storage backends.
//!
//! Two interchangeable implementations of every capability trait in
//! `chronicle_core::repository`: an arena-backed in-memory backend for tests
//! and embedded use, and a PostgreSQL backend. Both pass the contract tests in
//! `chronicle-test-support`.

pub mod memory;
pub mod pg_event_log;
pub mod pg_snapshot_repository;
pub mod pg_transaction_repository;
pub mod schema;

mod query_builder;

pub use memory::{InMemoryEventLog, InMemorySnapshotRepository, InMemoryTransactionRepository};
pub use pg_event_log::PgEventLog;
pub use pg_snapshot_repository::PgSnapshotRepository;
pub use pg_transaction_repository::PgTransactionRepository;

use chronicle_core::error::StoreError;

/// Embedded migrations for the PostgreSQL backend.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

pub(crate) fn infrastructure(err: sqlx::Error) -> StoreError {
    StoreError::Infrastructure(err.to_string())
}
