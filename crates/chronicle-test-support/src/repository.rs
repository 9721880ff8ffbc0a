//! Failing and delaying repositories for exercising storage-error paths
//! and interleavings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chronicle_core::error::StoreError;
use chronicle_core::event::{EventEntry, NewEvent};
use chronicle_core::query::EventFilter;
use chronicle_core::repository::{AppendMode, EventLog, EventStream, TransactionRepository};
use chronicle_core::transaction::{TransactionEntry, TransactionFilter, TransactionStatus};
use futures::{StreamExt, stream};
use uuid::Uuid;

fn connection_refused() -> StoreError {
    StoreError::Infrastructure("connection refused".into())
}

/// An event log that fails every operation with an infrastructure error.
#[derive(Debug)]
pub struct FailingEventLog;

#[async_trait]
impl EventLog for FailingEventLog {
    async fn append_all(
        &self,
        _events: Vec<NewEvent>,
        _mode: AppendMode,
    ) -> Result<Vec<EventEntry>, StoreError> {
        Err(connection_refused())
    }

    fn select(&self, _filter: EventFilter) -> EventStream<'_> {
        stream::once(async { Err(connection_refused()) }).boxed()
    }

    async fn offset(&self) -> Result<i64, StoreError> {
        Err(connection_refused())
    }
}

/// A transaction table that fails every operation with an infrastructure
/// error.
#[derive(Debug)]
pub struct FailingTransactionRepository;

#[async_trait]
impl TransactionRepository for FailingTransactionRepository {
    async fn insert(&self, _entry: &TransactionEntry) -> Result<(), StoreError> {
        Err(connection_refused())
    }

    async fn get(&self, _uuid: Uuid) -> Result<Option<TransactionEntry>, StoreError> {
        Err(connection_refused())
    }

    async fn save(
        &self,
        _entry: &TransactionEntry,
        _expected: TransactionStatus,
    ) -> Result<(), StoreError> {
        Err(connection_refused())
    }

    async fn select(
        &self,
        _filter: &TransactionFilter,
    ) -> Result<Vec<TransactionEntry>, StoreError> {
        Err(connection_refused())
    }
}

/// Wraps an event log and sleeps for `delay` before every commit batch and
/// every offset read, holding the caller inside its critical section.
pub struct DelayedEventLog {
    inner: Arc<dyn EventLog>,
    delay: Duration,
}

impl DelayedEventLog {
    /// Creates a delaying wrapper around `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn EventLog>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl std::fmt::Debug for DelayedEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedEventLog")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventLog for DelayedEventLog {
    async fn append_all(
        &self,
        events: Vec<NewEvent>,
        mode: AppendMode,
    ) -> Result<Vec<EventEntry>, StoreError> {
        if matches!(mode, AppendMode::Commit(_)) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.append_all(events, mode).await
    }

    fn select(&self, filter: EventFilter) -> EventStream<'_> {
        self.inner.select(filter)
    }

    async fn offset(&self) -> Result<i64, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.offset().await
    }
}
