//! Transaction table entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Lifecycle of a transaction.
///
/// ```text
/// PENDING ──► RESERVING ──► RESERVED ──► COMMITTING ──► COMMITTED
///    │            │             │             │
///    └────────────┴─────────────┴─────────────┴──► REJECTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Open; events may be staged.
    Pending,
    /// Validation in progress.
    Reserving,
    /// Validated; holds the optimistic lock on its staged versions.
    Reserved,
    /// Staged entries are being copied to the main line.
    Committing,
    /// Terminal: staged entries are part of the main line.
    Committed,
    /// Terminal: the transaction lost a race or was abandoned.
    Rejected,
}

impl TransactionStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Reserving,
        Self::Reserved,
        Self::Committing,
        Self::Committed,
        Self::Rejected,
    ];

    /// Statuses whose staged versions block competing reservations.
    pub const CLAIMING: [Self; 4] = [
        Self::Reserving,
        Self::Reserved,
        Self::Committing,
        Self::Committed,
    ];

    /// Returns the persisted name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reserving => "reserving",
            Self::Reserved => "reserved",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Rejected => "rejected",
        }
    }

    /// Returns `true` for `Committed` and `Rejected`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Rejected)
    }

    /// Returns `true` if a transaction in this status may still win the race
    /// for the versions it staged.
    #[must_use]
    pub fn is_claiming(self) -> bool {
        Self::CLAIMING.contains(&self)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StoreError::Serialization(format!("unknown transaction status: {s}")))
    }
}

/// A row of the transaction table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEntry {
    /// Transaction identity.
    pub uuid: Uuid,
    /// Current lifecycle status.
    pub status: TransactionStatus,
    /// Global log offset recorded at the most recent status transition.
    pub event_offset: Option<i64>,
    /// Whether leaving a transaction scope normally commits it.
    pub autocommit: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent status transition.
    pub updated_at: DateTime<Utc>,
}

impl TransactionEntry {
    /// Creates a new `Pending` transaction.
    #[must_use]
    pub fn new(uuid: Uuid, autocommit: bool, now: DateTime<Utc>) -> Self {
        Self {
            uuid,
            status: TransactionStatus::Pending,
            event_offset: None,
            autocommit,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns a copy moved to `status`, stamped with `event_offset`.
    #[must_use]
    pub fn transitioned(
        &self,
        status: TransactionStatus,
        event_offset: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status,
            event_offset: event_offset.or(self.event_offset),
            updated_at: now,
            ..self.clone()
        }
    }
}

/// Filter over the transaction table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    /// Restrict to these transaction uuids.
    pub uuid_in: Option<Vec<Uuid>>,
    /// Restrict to these statuses.
    pub status_in: Option<Vec<TransactionStatus>>,
}

impl TransactionFilter {
    /// Matches every transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the filter to the given uuids.
    #[must_use]
    pub fn uuid_in(mut self, uuids: impl IntoIterator<Item = Uuid>) -> Self {
        self.uuid_in = Some(uuids.into_iter().collect());
        self
    }

    /// Restricts the filter to the given statuses.
    #[must_use]
    pub fn status_in(mut self, statuses: impl IntoIterator<Item = TransactionStatus>) -> Self {
        self.status_in = Some(statuses.into_iter().collect());
        self
    }

    /// Evaluates the filter against a single entry.
    #[must_use]
    pub fn matches(&self, entry: &TransactionEntry) -> bool {
        self.uuid_in
            .as_ref()
            .is_none_or(|uuids| uuids.contains(&entry.uuid))
            && self
                .status_in
                .as_ref()
                .is_none_or(|statuses| statuses.contains(&entry.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_its_name() {
        for status in TransactionStatus::ALL {
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(matches!(
            "foo".parse::<TransactionStatus>(),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_only_committed_and_rejected_are_terminal() {
        let terminal: Vec<_> = TransactionStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![TransactionStatus::Committed, TransactionStatus::Rejected]
        );
    }

    #[test]
    fn test_pending_and_rejected_do_not_claim_versions() {
        assert!(!TransactionStatus::Pending.is_claiming());
        assert!(!TransactionStatus::Rejected.is_claiming());
        assert!(TransactionStatus::Reserving.is_claiming());
        assert!(TransactionStatus::Committed.is_claiming());
    }

    #[test]
    fn test_new_transaction_is_pending_without_offset() {
        let now = Utc::now();
        let entry = TransactionEntry::new(Uuid::new_v4(), true, now);

        assert_eq!(entry.status, TransactionStatus::Pending);
        assert_eq!(entry.event_offset, None);
        assert!(entry.autocommit);
        assert_eq!(entry.created_at, entry.updated_at);
    }

    #[test]
    fn test_transitioned_keeps_previous_offset_when_none_given() {
        let now = Utc::now();
        let entry = TransactionEntry::new(Uuid::new_v4(), false, now).transitioned(
            TransactionStatus::Reserving,
            Some(55),
            now,
        );

        let next = entry.transitioned(TransactionStatus::Rejected, None, now);

        assert_eq!(next.status, TransactionStatus::Rejected);
        assert_eq!(next.event_offset, Some(55));
        assert_eq!(next.uuid, entry.uuid);
    }

    #[test]
    fn test_filter_combines_uuid_and_status() {
        let now = Utc::now();
        let reserved = TransactionEntry::new(Uuid::new_v4(), true, now).transitioned(
            TransactionStatus::Reserved,
            Some(1),
            now,
        );
        let pending = TransactionEntry::new(Uuid::new_v4(), true, now);

        let filter = TransactionFilter::new()
            .uuid_in([reserved.uuid, pending.uuid])
            .status_in(TransactionStatus::CLAIMING);

        assert!(filter.matches(&reserved));
        assert!(!filter.matches(&pending));
        assert!(TransactionFilter::new().matches(&pending));
    }
}
