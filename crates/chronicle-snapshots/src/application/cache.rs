//! Concurrent snapshot cache.
//!
//! Entries are keyed by `(aggregate_uuid, transaction_uuid)` and remember the
//! highest global id visible when they were folded. A lookup with a
//! different watermark misses, so any append visible to the key invalidates
//! it without bookkeeping on the write path.

use chronicle_core::repository::TransactionListener;
use chronicle_core::snapshot::SnapshotEntry;
use chronicle_core::transaction::{TransactionEntry, TransactionStatus};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

type CacheKey = (Uuid, Option<Uuid>);

#[derive(Debug, Clone)]
struct Cached {
    watermark: i64,
    snapshot: SnapshotEntry,
}

/// Per-key snapshot cache backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    entries: DashMap<CacheKey, Cached>,
}

impl SnapshotCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached snapshot if it was folded at `watermark`.
    #[must_use]
    pub fn get(
        &self,
        aggregate_uuid: Uuid,
        transaction_uuid: Option<Uuid>,
        watermark: i64,
    ) -> Option<SnapshotEntry> {
        self.entries
            .get(&(aggregate_uuid, transaction_uuid))
            .filter(|cached| cached.watermark == watermark)
            .map(|cached| cached.snapshot.clone())
    }

    /// Stores a snapshot folded at `watermark`, replacing any older one.
    pub fn insert(&self, snapshot: SnapshotEntry, watermark: i64) {
        let key = (snapshot.aggregate_uuid, snapshot.transaction_uuid);
        self.entries.insert(key, Cached { watermark, snapshot });
    }

    /// Drops the entry for one view of one aggregate.
    pub fn invalidate(&self, aggregate_uuid: Uuid, transaction_uuid: Option<Uuid>) {
        self.entries.remove(&(aggregate_uuid, transaction_uuid));
    }

    /// Number of cached views.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TransactionListener for SnapshotCache {
    fn on_finished(&self, entry: &TransactionEntry, aggregates: &[Uuid]) {
        for aggregate_uuid in aggregates {
            self.invalidate(*aggregate_uuid, Some(entry.uuid));
            if entry.status == TransactionStatus::Committed {
                self.invalidate(*aggregate_uuid, None);
            }
        }
        debug!(
            transaction_uuid = %entry.uuid,
            status = %entry.status,
            aggregates = aggregates.len(),
            "snapshot cache invalidated"
        );
    }
}
