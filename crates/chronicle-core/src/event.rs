//! Event log entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Intent of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Establishes the initial state of an aggregate lineage.
    Create,
    /// Merges a partial diff into the current state.
    Update,
    /// Marks the aggregate as a tombstone.
    Delete,
}

impl Action {
    /// Returns the persisted name of the action.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(StoreError::Serialization(format!("unknown action: {other}"))),
        }
    }
}

/// An appended, immutable event log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEntry {
    /// Global position in the log, assigned at append time.
    pub id: i64,
    /// Identity of the mutated aggregate.
    pub aggregate_uuid: Uuid,
    /// Logical type name of the aggregate.
    pub aggregate_name: String,
    /// Position within the aggregate's history.
    pub version: i64,
    /// Opaque serialized diff.
    pub data: Vec<u8>,
    /// Intent of the event.
    pub action: Action,
    /// Append timestamp.
    pub created_at: DateTime<Utc>,
    /// `None` once committed to the main line; otherwise the staging
    /// transaction.
    pub transaction_uuid: Option<Uuid>,
}

impl EventEntry {
    /// Returns `true` if this entry belongs to the main line.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.transaction_uuid.is_none()
    }

    /// Builds the main-line copy of a staged entry, keeping its version.
    #[must_use]
    pub fn to_committed(&self) -> NewEvent {
        NewEvent {
            aggregate_uuid: self.aggregate_uuid,
            aggregate_name: self.aggregate_name.clone(),
            version: Some(self.version),
            data: self.data.clone(),
            action: self.action,
            transaction_uuid: None,
        }
    }
}

/// An event that has not been appended yet.
///
/// `version` may be left empty, in which case the log assigns the next
/// version of the entry's visibility scope: the main line for committed
/// entries, or the main line plus the staging transaction's own entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Identity of the mutated aggregate.
    pub aggregate_uuid: Uuid,
    /// Logical type name of the aggregate.
    pub aggregate_name: String,
    /// Explicit version, or `None` to let the log assign one.
    pub version: Option<i64>,
    /// Opaque serialized diff.
    pub data: Vec<u8>,
    /// Intent of the event.
    pub action: Action,
    /// Staging transaction, or `None` for the main line.
    pub transaction_uuid: Option<Uuid>,
}

impl NewEvent {
    /// Creates a main-line event with a log-assigned version.
    #[must_use]
    pub fn new(
        aggregate_uuid: Uuid,
        aggregate_name: impl Into<String>,
        action: Action,
        data: Vec<u8>,
    ) -> Self {
        Self {
            aggregate_uuid,
            aggregate_name: aggregate_name.into(),
            version: None,
            data,
            action,
            transaction_uuid: None,
        }
    }

    /// Stages the event under `transaction_uuid`.
    #[must_use]
    pub fn in_transaction(mut self, transaction_uuid: Uuid) -> Self {
        self.transaction_uuid = Some(transaction_uuid);
        self
    }

    /// Pins the event to an explicit version.
    #[must_use]
    pub fn at_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }
}
