//! Transaction manager — drives the reservation/commit protocol.
//!
//! Each operation loads the transaction row, checks that the requested
//! transition is permitted, does its work against the event log and persists
//! the new status. Conflicts surface as `StoreError::RepositoryConflict`
//! after the transaction has been moved to `Rejected`.
//!
//! Staging holds the stripes of its aggregate and of its transaction. The
//! other operations hold the transaction's stripe plus those of every
//! aggregate it staged, so a transaction's staged set cannot change while
//! it is being validated, published or rejected.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chronicle_core::clock::{Clock, SystemClock};
use chronicle_core::error::StoreError;
use chronicle_core::event::{EventEntry, NewEvent};
use chronicle_core::query::{EventFilter, TransactionPredicate};
use chronicle_core::repository::{AppendMode, EventLog, TransactionListener, TransactionRepository};
use chronicle_core::transaction::{TransactionEntry, TransactionFilter, TransactionStatus};
use tokio::sync::MutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::locks::AggregateLocks;
use crate::domain::conflict::{self, Conflict};
use crate::domain::transitions::{Operation, ensure_allowed};

type Guards<'a> = Vec<MutexGuard<'a, ()>>;

/// Coordinates transactions over an event log and a transaction table.
pub struct TransactionManager {
    events: Arc<dyn EventLog>,
    transactions: Arc<dyn TransactionRepository>,
    clock: Arc<dyn Clock>,
    locks: AggregateLocks,
    listeners: Vec<Arc<dyn TransactionListener>>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("clock", &self.clock)
            .field("locks", &self.locks.stripes())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl TransactionManager {
    /// Creates a manager using the system clock and the default stripe count.
    #[must_use]
    pub fn new(events: Arc<dyn EventLog>, transactions: Arc<dyn TransactionRepository>) -> Self {
        Self {
            events,
            transactions,
            clock: Arc::new(SystemClock),
            locks: AggregateLocks::default(),
            listeners: Vec::new(),
        }
    }

    /// Replaces the clock used to stamp transaction rows.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the aggregate lock table with one of `stripes` entries.
    #[must_use]
    pub fn with_lock_stripes(mut self, stripes: usize) -> Self {
        self.locks = AggregateLocks::new(stripes);
        self
    }

    /// Registers a listener told about every transaction that reaches a
    /// terminal status.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn TransactionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// The event log this manager writes to.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventLog> {
        &self.events
    }

    /// Opens a new `Pending` transaction.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the transaction row cannot be written.
    #[tracing::instrument(skip(self))]
    pub async fn begin(&self, autocommit: bool) -> Result<TransactionEntry, StoreError> {
        let entry = TransactionEntry::new(Uuid::new_v4(), autocommit, self.clock.now());
        self.transactions.insert(&entry).await?;
        debug!(transaction_uuid = %entry.uuid, "transaction opened");
        Ok(entry)
    }

    /// Loads a transaction row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::TransactionNotFound` if no such row exists.
    pub async fn get(&self, transaction_uuid: Uuid) -> Result<TransactionEntry, StoreError> {
        self.transactions
            .get(transaction_uuid)
            .await?
            .ok_or(StoreError::TransactionNotFound(transaction_uuid))
    }

    /// Appends `event` either to the main line (`None`) or as a staged entry
    /// of a pending transaction. An absent version is assigned from the
    /// writer's own view of the aggregate.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidTransactionStatus` if the transaction is
    /// no longer pending, `StoreError::VersionConflict` on an explicit
    /// version that does not extend the history, or a storage error.
    #[tracing::instrument(skip(self, event), fields(aggregate_uuid = %event.aggregate_uuid))]
    pub async fn stage(
        &self,
        transaction_uuid: Option<Uuid>,
        event: NewEvent,
    ) -> Result<EventEntry, StoreError> {
        let event = NewEvent {
            transaction_uuid,
            ..event
        };
        let _guards = self
            .locks
            .lock(std::iter::once(event.aggregate_uuid).chain(transaction_uuid))
            .await;

        if let Some(transaction_uuid) = transaction_uuid {
            let entry = self.get(transaction_uuid).await?;
            ensure_allowed(&entry, Operation::Stage)?;
        }

        self.events.append(event).await
    }

    /// Validates the transaction's staged claims and moves it to `Reserved`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidTransactionStatus` unless the transaction
    /// is pending, and `StoreError::RepositoryConflict` (after rejecting it)
    /// if a competing claim exists.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, transaction_uuid: Uuid) -> Result<TransactionEntry, StoreError> {
        let (_guards, staged) = self.lock_staged(transaction_uuid).await?;

        let entry = self.get(transaction_uuid).await?;
        ensure_allowed(&entry, Operation::Reserve)?;
        self.reserve_locked(&entry, &staged).await
    }

    /// Publishes the transaction's staged entries to the main line.
    ///
    /// A pending transaction is reserved first. The copy is all-or-nothing:
    /// if any version was taken in the meantime nothing is written.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidTransactionStatus` unless the transaction
    /// is pending or reserved, `StoreError::RepositoryConflict` (after
    /// rejecting it) if validation or the copy loses a race, or a storage
    /// error. A storage error during the copy leaves the transaction
    /// `Committing`.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self, transaction_uuid: Uuid) -> Result<TransactionEntry, StoreError> {
        let (_guards, staged) = self.lock_staged(transaction_uuid).await?;

        let entry = self.get(transaction_uuid).await?;
        ensure_allowed(&entry, Operation::Commit)?;

        let entry = if entry.status == TransactionStatus::Pending {
            self.reserve_locked(&entry, &staged).await?
        } else {
            entry
        };
        self.commit_locked(&entry, &staged).await
    }

    /// Abandons a transaction that has not reached a terminal status. Its
    /// staged entries stay in the log but never become visible outside it.
    /// A commit in progress in this process finishes first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidTransactionStatus` if the transaction is
    /// already committed or rejected.
    #[tracing::instrument(skip(self))]
    pub async fn reject(&self, transaction_uuid: Uuid) -> Result<TransactionEntry, StoreError> {
        let (_guards, staged) = self.lock_staged(transaction_uuid).await?;

        let entry = self.get(transaction_uuid).await?;
        ensure_allowed(&entry, Operation::Reject)?;

        let offset = self.events.offset().await?;
        let entry = self
            .transition(&entry, TransactionStatus::Rejected, Some(offset))
            .await?;
        self.notify(&entry, &staged);
        Ok(entry)
    }

    async fn reserve_locked(
        &self,
        entry: &TransactionEntry,
        staged: &[EventEntry],
    ) -> Result<TransactionEntry, StoreError> {
        let baseline = entry.event_offset;
        let offset = self.events.offset().await?;
        let entry = self
            .transition(entry, TransactionStatus::Reserving, Some(offset))
            .await?;

        let conflict = self.find_conflict(entry.uuid, baseline, staged).await?;

        let offset = self.events.offset().await?;
        match conflict {
            None => {
                let entry = self
                    .transition(&entry, TransactionStatus::Reserved, Some(offset))
                    .await?;
                debug!(transaction_uuid = %entry.uuid, claims = staged.len(), "transaction reserved");
                Ok(entry)
            }
            Some(conflict) => Err(self.lose(&entry, staged, offset, &conflict).await?),
        }
    }

    async fn commit_locked(
        &self,
        entry: &TransactionEntry,
        staged: &[EventEntry],
    ) -> Result<TransactionEntry, StoreError> {
        let entry = self
            .transition(entry, TransactionStatus::Committing, None)
            .await?;

        let mut ordered: Vec<&EventEntry> = staged.iter().collect();
        ordered.sort_by_key(|staged| (staged.version, staged.id));
        let batch = ordered.into_iter().map(EventEntry::to_committed).collect();

        match self
            .events
            .append_all(batch, AppendMode::Commit(entry.uuid))
            .await
        {
            Ok(appended) => {
                let offset = self.events.offset().await?;
                let entry = self
                    .transition(&entry, TransactionStatus::Committed, Some(offset))
                    .await?;
                debug!(transaction_uuid = %entry.uuid, events = appended.len(), "staged entries published");
                self.notify(&entry, staged);
                Ok(entry)
            }
            Err(err @ StoreError::RepositoryConflict { .. }) => {
                let offset = self.events.offset().await?;
                let entry = self
                    .transition(&entry, TransactionStatus::Rejected, Some(offset))
                    .await?;
                warn!(transaction_uuid = %entry.uuid, error = %err, "commit lost a race");
                self.notify(&entry, staged);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Rejects a transaction that lost validation and builds the error to
    /// hand back to the caller.
    async fn lose(
        &self,
        entry: &TransactionEntry,
        staged: &[EventEntry],
        offset: i64,
        conflict: &Conflict,
    ) -> Result<StoreError, StoreError> {
        let entry = self
            .transition(entry, TransactionStatus::Rejected, Some(offset))
            .await?;
        warn!(transaction_uuid = %entry.uuid, %conflict, "reservation conflict");
        self.notify(&entry, staged);
        Ok(StoreError::RepositoryConflict {
            transaction_uuid: entry.uuid,
            reason: conflict.to_string(),
        })
    }

    async fn find_conflict(
        &self,
        transaction_uuid: Uuid,
        baseline: Option<i64>,
        staged: &[EventEntry],
    ) -> Result<Option<Conflict>, StoreError> {
        let mut competing = Vec::new();
        for (aggregate_uuid, version) in conflict::claims(transaction_uuid, staged) {
            let mut filter = EventFilter::new()
                .aggregate(aggregate_uuid)
                .version(version)
                .transaction(TransactionPredicate::Ne(transaction_uuid));
            if let Some(baseline) = baseline {
                filter = filter.id_gt(baseline);
            }
            competing.extend(self.events.select_all(filter).await?);
        }

        let rivals: BTreeSet<Uuid> = competing
            .iter()
            .filter_map(|entry| entry.transaction_uuid)
            .collect();
        let statuses: HashMap<Uuid, TransactionStatus> = if rivals.is_empty() {
            HashMap::new()
        } else {
            self.transactions
                .select(&TransactionFilter::new().uuid_in(rivals))
                .await?
                .into_iter()
                .map(|rival| (rival.uuid, rival.status))
                .collect()
        };

        Ok(conflict::find_conflict(
            transaction_uuid,
            staged,
            &competing,
            &statuses,
        ))
    }

    /// Takes the stripes of the transaction and of every aggregate it has
    /// staged. The staged set is re-read under the locks and the locks are
    /// widened until they cover it.
    async fn lock_staged(
        &self,
        transaction_uuid: Uuid,
    ) -> Result<(Guards<'_>, Vec<EventEntry>), StoreError> {
        let mut keys = BTreeSet::from([transaction_uuid]);
        loop {
            let guards = self.locks.lock(keys.iter().copied()).await;
            let staged = self.staged_entries(transaction_uuid).await?;
            let aggregates = aggregates_of(&staged);
            if aggregates.is_subset(&keys) {
                return Ok((guards, staged));
            }
            drop(guards);
            keys.extend(aggregates);
        }
    }

    async fn staged_entries(&self, transaction_uuid: Uuid) -> Result<Vec<EventEntry>, StoreError> {
        self.events
            .select_all(EventFilter::new().transaction(TransactionPredicate::Eq(transaction_uuid)))
            .await
    }

    async fn transition(
        &self,
        entry: &TransactionEntry,
        status: TransactionStatus,
        event_offset: Option<i64>,
    ) -> Result<TransactionEntry, StoreError> {
        let next = entry.transitioned(status, event_offset, self.clock.now());
        self.transactions.save(&next, entry.status).await?;
        info!(
            transaction_uuid = %next.uuid,
            from = %entry.status,
            to = %status,
            offset = ?next.event_offset,
            "transaction status changed"
        );
        Ok(next)
    }

    fn notify(&self, entry: &TransactionEntry, staged: &[EventEntry]) {
        let aggregates: Vec<Uuid> = aggregates_of(staged).into_iter().collect();
        for listener in &self.listeners {
            listener.on_finished(entry, &aggregates);
        }
    }
}

fn aggregates_of(staged: &[EventEntry]) -> BTreeSet<Uuid> {
    staged.iter().map(|entry| entry.aggregate_uuid).collect()
}
