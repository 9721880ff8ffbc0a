//! Snapshot materializer — answers state queries from the event log.

use std::collections::HashSet;
use std::sync::Arc;

use chronicle_core::error::StoreError;
use chronicle_core::query::{EventFilter, Order, TransactionPredicate};
use chronicle_core::repository::{EventLog, SnapshotRepository, TransactionListener};
use chronicle_core::snapshot::SnapshotEntry;
use chronicle_core::transaction::TransactionEntry;
use futures::TryStreamExt;
use tracing::{debug, info};
use uuid::Uuid;

use super::cache::SnapshotCache;
use crate::domain::fold::{fold, visible_history};
use crate::domain::reducer::{JsonMergeReducer, StateReducer};

/// Outcome of a [`SnapshotMaterializer::synchronize`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Aggregates re-materialized.
    pub aggregates: usize,
    /// Global offset the snapshot table now reflects.
    pub offset: i64,
}

/// Folds visible events into snapshots, with an optional cache and an
/// optional persisted snapshot table for the main line.
pub struct SnapshotMaterializer {
    events: Arc<dyn EventLog>,
    snapshots: Option<Arc<dyn SnapshotRepository>>,
    reducer: Arc<dyn StateReducer>,
    cache: Option<SnapshotCache>,
}

impl std::fmt::Debug for SnapshotMaterializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotMaterializer")
            .field("reducer", &self.reducer)
            .field("persisted", &self.snapshots.is_some())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl SnapshotMaterializer {
    /// Creates a materializer with the JSON merge reducer and the cache on.
    #[must_use]
    pub fn new(events: Arc<dyn EventLog>) -> Self {
        Self {
            events,
            snapshots: None,
            reducer: Arc::new(JsonMergeReducer),
            cache: Some(SnapshotCache::new()),
        }
    }

    /// Replaces the state reducer.
    #[must_use]
    pub fn with_reducer(mut self, reducer: Arc<dyn StateReducer>) -> Self {
        self.reducer = reducer;
        self
    }

    /// Persists main-line snapshots to `snapshots` and folds on top of them.
    #[must_use]
    pub fn with_repository(mut self, snapshots: Arc<dyn SnapshotRepository>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Turns the in-process cache on or off.
    #[must_use]
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = enabled.then(SnapshotCache::new);
        self
    }

    /// The in-process cache, if enabled.
    #[must_use]
    pub fn cache(&self) -> Option<&SnapshotCache> {
        self.cache.as_ref()
    }

    /// Current state of an aggregate as seen from the main line (`None`) or
    /// from inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AggregateNotFound` when nothing is visible,
    /// `StoreError::DeletedAggregate` when the last visible event is a
    /// deletion, or a storage/decoding error.
    #[tracing::instrument(skip(self))]
    pub async fn get(
        &self,
        aggregate_uuid: Uuid,
        transaction_uuid: Option<Uuid>,
    ) -> Result<SnapshotEntry, StoreError> {
        match self.materialize(aggregate_uuid, transaction_uuid).await? {
            None => Err(StoreError::AggregateNotFound(aggregate_uuid)),
            Some(snapshot) if snapshot.is_deleted() => {
                Err(StoreError::DeletedAggregate(aggregate_uuid))
            }
            Some(snapshot) => Ok(snapshot),
        }
    }

    /// Replays the aggregate's main line from version 1, ignoring any cached
    /// or persisted snapshot, and stores the result. Tombstones are returned
    /// rather than reported as errors.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AggregateNotFound` if the aggregate has no
    /// committed history, or a storage/decoding error.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild(&self, aggregate_uuid: Uuid) -> Result<SnapshotEntry, StoreError> {
        let entries = self
            .events
            .select_all(
                EventFilter::new()
                    .aggregate(aggregate_uuid)
                    .transaction(TransactionPredicate::committed()),
            )
            .await?;
        let watermark = entries.iter().map(|entry| entry.id).max();
        let history = visible_history(entries, None);
        let snapshot = fold(self.reducer.as_ref(), None, &history, None)?
            .ok_or(StoreError::AggregateNotFound(aggregate_uuid))?;

        if let Some(snapshots) = &self.snapshots {
            snapshots.store(&snapshot).await?;
        }
        if let (Some(cache), Some(watermark)) = (&self.cache, watermark) {
            cache.insert(snapshot.clone(), watermark);
        }
        Ok(snapshot)
    }

    /// Brings the persisted snapshot table up to the current log offset:
    /// every aggregate with committed entries past the stored offset is
    /// re-materialized, then the offset advances.
    ///
    /// Without a snapshot table this is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a storage/decoding error; the stored offset is left unchanged
    /// in that case.
    #[tracing::instrument(skip(self))]
    pub async fn synchronize(&self) -> Result<SyncReport, StoreError> {
        let Some(snapshots) = &self.snapshots else {
            debug!("no snapshot table configured");
            return Ok(SyncReport::default());
        };

        let from = snapshots.offset().await?;
        let to = self.events.offset().await?;

        let mut touched = Vec::new();
        let mut seen = HashSet::new();
        let mut stream = self.events.select(
            EventFilter::new()
                .transaction(TransactionPredicate::committed())
                .id_gt(from)
                .id_le(to),
        );
        while let Some(entry) = stream.try_next().await? {
            if seen.insert(entry.aggregate_uuid) {
                touched.push(entry.aggregate_uuid);
            }
        }
        drop(stream);

        for aggregate_uuid in &touched {
            let base = snapshots.get(*aggregate_uuid).await?;
            let mut filter = EventFilter::new()
                .aggregate(*aggregate_uuid)
                .transaction(TransactionPredicate::committed())
                .id_le(to);
            if let Some(base) = &base {
                filter = filter.version_gt(base.version);
            }
            let history = visible_history(self.events.select_all(filter).await?, None);
            if let Some(snapshot) = fold(self.reducer.as_ref(), base, &history, None)? {
                snapshots.store(&snapshot).await?;
            }
        }
        snapshots.store_offset(to).await?;

        info!(from, to, aggregates = touched.len(), "snapshots synchronized");
        Ok(SyncReport {
            aggregates: touched.len(),
            offset: to,
        })
    }

    async fn materialize(
        &self,
        aggregate_uuid: Uuid,
        transaction_uuid: Option<Uuid>,
    ) -> Result<Option<SnapshotEntry>, StoreError> {
        let Some(cache) = &self.cache else {
            return self.fold_from_log(aggregate_uuid, transaction_uuid).await;
        };

        let watermark = self.watermark(aggregate_uuid, transaction_uuid).await?;
        if let Some(hit) = watermark.and_then(|w| cache.get(aggregate_uuid, transaction_uuid, w)) {
            debug!(%aggregate_uuid, version = hit.version, "snapshot cache hit");
            return Ok(Some(hit));
        }

        let snapshot = self.fold_from_log(aggregate_uuid, transaction_uuid).await?;
        if let (Some(snapshot), Some(watermark)) = (&snapshot, watermark) {
            cache.insert(
                SnapshotEntry {
                    transaction_uuid,
                    ..snapshot.clone()
                },
                watermark,
            );
        }
        Ok(snapshot)
    }

    /// Highest global id visible to the view, if any.
    async fn watermark(
        &self,
        aggregate_uuid: Uuid,
        transaction_uuid: Option<Uuid>,
    ) -> Result<Option<i64>, StoreError> {
        let latest = self
            .events
            .select_all(
                EventFilter::new()
                    .aggregate(aggregate_uuid)
                    .transaction(TransactionPredicate::visible_to(transaction_uuid))
                    .order(Order::Descending)
                    .limit(1),
            )
            .await?;
        Ok(latest.first().map(|entry| entry.id))
    }

    async fn fold_from_log(
        &self,
        aggregate_uuid: Uuid,
        transaction_uuid: Option<Uuid>,
    ) -> Result<Option<SnapshotEntry>, StoreError> {
        let base = match (transaction_uuid, &self.snapshots) {
            (None, Some(snapshots)) => snapshots.get(aggregate_uuid).await?,
            _ => None,
        };

        let mut filter = EventFilter::new()
            .aggregate(aggregate_uuid)
            .transaction(TransactionPredicate::visible_to(transaction_uuid));
        if let Some(base) = &base {
            filter = filter.version_gt(base.version);
        }
        let entries = self.events.select_all(filter).await?;
        debug!(%aggregate_uuid, entries = entries.len(), "folding from log");

        let history = visible_history(entries, transaction_uuid);
        fold(self.reducer.as_ref(), base, &history, transaction_uuid)
    }
}

impl TransactionListener for SnapshotMaterializer {
    fn on_finished(&self, entry: &TransactionEntry, aggregates: &[Uuid]) {
        if let Some(cache) = &self.cache {
            cache.on_finished(entry, aggregates);
        }
    }
}
