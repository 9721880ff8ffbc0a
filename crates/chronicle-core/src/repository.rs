//! Storage capability traits.
//!
//! Three capabilities are drawn as traits so that the in-memory and the
//! PostgreSQL backends are interchangeable and pass the same contract tests:
//! the append-only [`EventLog`], the [`TransactionRepository`] and the
//! disposable [`SnapshotRepository`].

use async_trait::async_trait;
use futures::TryStreamExt;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::StoreError;
use crate::event::{EventEntry, NewEvent};
use crate::query::EventFilter;
use crate::snapshot::SnapshotEntry;
use crate::transaction::{TransactionEntry, TransactionFilter, TransactionStatus};

/// Lazy, finite, forward-only sequence of event entries.
pub type EventStream<'a> = BoxStream<'a, Result<EventEntry, StoreError>>;

/// How a batch of events is checked before it is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendMode {
    /// Each entry follows the rules of a single append.
    Plain,
    /// The batch is the main-line copy of transaction `0`'s staged entries.
    /// A main-line entry already holding one of the batch's
    /// `(aggregate_uuid, version)` pairs was contributed by another writer
    /// and fails the whole batch with `RepositoryConflict`.
    Commit(Uuid),
}

/// Append-only, globally ordered event log.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends a batch atomically: either every entry is appended, in order,
    /// with consecutive global ids, or none is.
    ///
    /// # Errors
    ///
    /// Returns `VersionConflict` if a main-line entry does not extend its
    /// aggregate's history by exactly one, `RepositoryConflict` for a
    /// [`AppendMode::Commit`] batch that collides with another writer, and
    /// `Infrastructure` on storage failure.
    async fn append_all(
        &self,
        events: Vec<NewEvent>,
        mode: AppendMode,
    ) -> Result<Vec<EventEntry>, StoreError>;

    /// Streams the entries matching `filter`. Each call is an independent
    /// read.
    fn select(&self, filter: EventFilter) -> EventStream<'_>;

    /// Returns the highest global id in the log, or 0 if it is empty.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` on storage failure.
    async fn offset(&self) -> Result<i64, StoreError>;

    /// Appends a single event.
    ///
    /// # Errors
    ///
    /// See [`EventLog::append_all`].
    async fn append(&self, event: NewEvent) -> Result<EventEntry, StoreError> {
        self.append_all(vec![event], AppendMode::Plain)
            .await?
            .pop()
            .ok_or_else(|| StoreError::Infrastructure("append returned no entry".into()))
    }

    /// Collects the entries matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by the stream.
    async fn select_all(&self, filter: EventFilter) -> Result<Vec<EventEntry>, StoreError> {
        self.select(filter).try_collect().await
    }
}

/// Durable transaction table.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Inserts a new transaction row.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` if the uuid already exists or storage fails.
    async fn insert(&self, entry: &TransactionEntry) -> Result<(), StoreError>;

    /// Loads a transaction row.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` on storage failure.
    async fn get(&self, uuid: Uuid) -> Result<Option<TransactionEntry>, StoreError>;

    /// Writes the status, offset and update time of an existing row, as long
    /// as the stored status is still `expected`.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` if the row does not exist and
    /// `InvalidTransactionStatus` if another writer moved it away from
    /// `expected` first.
    async fn save(
        &self,
        entry: &TransactionEntry,
        expected: TransactionStatus,
    ) -> Result<(), StoreError>;

    /// Returns the rows matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` on storage failure.
    async fn select(&self, filter: &TransactionFilter)
    -> Result<Vec<TransactionEntry>, StoreError>;
}

/// Persisted main-line snapshots.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Inserts or replaces the snapshot of `entry.aggregate_uuid`.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` on storage failure.
    async fn store(&self, entry: &SnapshotEntry) -> Result<(), StoreError>;

    /// Loads the stored snapshot of an aggregate, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` on storage failure.
    async fn get(&self, aggregate_uuid: Uuid) -> Result<Option<SnapshotEntry>, StoreError>;

    /// Returns the log offset up to which snapshots are synchronized.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` on storage failure.
    async fn offset(&self) -> Result<i64, StoreError>;

    /// Records the log offset up to which snapshots are synchronized.
    ///
    /// # Errors
    ///
    /// Returns `Infrastructure` on storage failure.
    async fn store_offset(&self, offset: i64) -> Result<(), StoreError>;
}

/// Observer of transaction outcomes.
pub trait TransactionListener: Send + Sync {
    /// Called once a transaction reaches `Committed` or `Rejected`.
    /// `aggregates` lists every aggregate it staged entries for.
    fn on_finished(&self, entry: &TransactionEntry, aggregates: &[Uuid]);
}

/// Decides the version of a main-line entry about to be appended.
///
/// `current` is the aggregate's highest main-line version (including earlier
/// entries of the same batch) and `occupied` tells whether a main-line entry
/// already holds the supplied version.
///
/// # Errors
///
/// Returns `RepositoryConflict` for a commit batch hitting an occupied
/// version, otherwise `VersionConflict` if the version is not `current + 1`.
pub fn next_committed_version(
    event: &NewEvent,
    current: i64,
    occupied: bool,
    mode: AppendMode,
) -> Result<i64, StoreError> {
    let expected = current + 1;
    let Some(version) = event.version else {
        return Ok(expected);
    };
    if let (AppendMode::Commit(transaction_uuid), true) = (mode, occupied) {
        return Err(StoreError::RepositoryConflict {
            transaction_uuid,
            reason: format!(
                "version {version} of aggregate {} was committed by another writer",
                event.aggregate_uuid
            ),
        });
    }
    if version != expected {
        return Err(StoreError::VersionConflict {
            aggregate_uuid: event.aggregate_uuid,
            expected,
            actual: version,
        });
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Action;

    fn event(version: Option<i64>) -> NewEvent {
        NewEvent {
            aggregate_uuid: Uuid::new_v4(),
            aggregate_name: "shop.Order".to_owned(),
            version,
            data: Vec::new(),
            action: Action::Update,
            transaction_uuid: None,
        }
    }

    #[test]
    fn test_unversioned_event_gets_next_version() {
        let version = next_committed_version(&event(None), 4, false, AppendMode::Plain).unwrap();
        assert_eq!(version, 5);
    }

    #[test]
    fn test_gap_is_a_version_conflict() {
        let result = next_committed_version(&event(Some(7)), 4, false, AppendMode::Plain);

        match result {
            Err(StoreError::VersionConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 5);
                assert_eq!(actual, 7);
            }
            other => panic!("expected VersionConflict, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_duplicate_is_a_version_conflict() {
        let result = next_committed_version(&event(Some(4)), 4, true, AppendMode::Plain);
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
    }

    #[test]
    fn test_commit_duplicate_is_a_repository_conflict() {
        let transaction_uuid = Uuid::new_v4();
        let result = next_committed_version(
            &event(Some(4)),
            4,
            true,
            AppendMode::Commit(transaction_uuid),
        );

        match result {
            Err(StoreError::RepositoryConflict {
                transaction_uuid: t,
                ..
            }) => assert_eq!(t, transaction_uuid),
            other => panic!("expected RepositoryConflict, got {other:?}"),
        }
    }
}
