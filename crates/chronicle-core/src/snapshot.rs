//! Materialized aggregate state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current state of an aggregate, folded from its visible events.
///
/// Snapshots are a derived cache: they can always be rebuilt by replaying
/// the event log from version 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Identity of the aggregate.
    pub aggregate_uuid: Uuid,
    /// Logical type name of the aggregate.
    pub aggregate_name: String,
    /// Version of the latest event folded into this snapshot.
    pub version: i64,
    /// Opaque schema descriptor provided by the state reducer.
    pub schema: Vec<u8>,
    /// Materialized state, or `None` for a tombstone.
    pub data: Option<Vec<u8>>,
    /// Timestamp of the event that started the current lineage.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the latest folded event.
    pub updated_at: DateTime<Utc>,
    /// `None` for the main line, otherwise the transaction whose staged
    /// entries are included.
    pub transaction_uuid: Option<Uuid>,
}

impl SnapshotEntry {
    /// Returns `true` if the last folded event deleted the aggregate.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.data.is_none()
    }
}
