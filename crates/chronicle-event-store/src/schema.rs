//! Event store database schema.
//!
//! Table DDL lives in the workspace `migrations/` directory; this module
//! holds the names and column lists the queries share, plus the advisory
//! lock keys.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Event log table, keyed by global id.
pub const EVENT_LOG_TABLE: &str = "event_log";

/// Transaction table, keyed by transaction uuid.
pub const TRANSACTION_TABLE: &str = "transactions";

/// Main-line snapshot table, keyed by aggregate uuid.
pub const SNAPSHOT_TABLE: &str = "snapshots";

/// Columns selected for every `EventEntry`.
pub const EVENT_COLUMNS: &str =
    "id, aggregate_uuid, aggregate_name, version, data, action, created_at, transaction_uuid";

/// Columns selected for every `TransactionEntry`.
pub const TRANSACTION_COLUMNS: &str =
    "uuid, status, event_offset, autocommit, created_at, updated_at";

/// Columns selected for every `SnapshotEntry`.
pub const SNAPSHOT_COLUMNS: &str =
    "aggregate_uuid, aggregate_name, version, schema, data, created_at, updated_at";

/// Advisory lock serializing global id assignment across appenders, so that
/// ids become visible in the order they were handed out.
pub const LOG_APPEND_LOCK_KEY: i64 = 0x6368_726f_6e69_636c;

/// Derives the advisory lock key guarding one aggregate's history.
#[must_use]
pub fn aggregate_lock_key(aggregate_uuid: Uuid) -> i64 {
    let digest = Sha256::digest(aggregate_uuid.as_bytes());
    let mut key = [0u8; 8];
    key.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(key)
}
