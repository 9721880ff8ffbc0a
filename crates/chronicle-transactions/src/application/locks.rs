//! Striped per-aggregate locks.
//!
//! Protocol operations serialize on the aggregates and the transaction they
//! touch within one process. Each uuid hashes to one of a fixed number of
//! stripes; unrelated uuids sharing a stripe only cost some contention.

use std::collections::BTreeSet;
use std::hash::{BuildHasher, BuildHasherDefault, DefaultHasher};

use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Default number of stripes.
pub const DEFAULT_STRIPES: usize = 64;

/// A fixed-size table of async mutexes keyed by aggregate uuid.
#[derive(Debug)]
pub struct AggregateLocks {
    stripes: Vec<Mutex<()>>,
}

impl AggregateLocks {
    /// Creates a table with `stripes` mutexes (at least one).
    #[must_use]
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Number of stripes in the table.
    #[must_use]
    pub fn stripes(&self) -> usize {
        self.stripes.len()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn stripe_of(&self, aggregate_uuid: Uuid) -> usize {
        let hash = BuildHasherDefault::<DefaultHasher>::default().hash_one(aggregate_uuid);
        (hash % self.stripes.len() as u64) as usize
    }

    /// Acquires the stripes covering `aggregates`.
    ///
    /// Stripes are taken once each, in ascending index order, so two callers
    /// locking overlapping sets cannot deadlock. The guards release on drop.
    pub async fn lock<I>(&self, aggregates: I) -> Vec<MutexGuard<'_, ()>>
    where
        I: IntoIterator<Item = Uuid>,
    {
        let indices: BTreeSet<usize> = aggregates
            .into_iter()
            .map(|aggregate_uuid| self.stripe_of(aggregate_uuid))
            .collect();

        let mut guards = Vec::with_capacity(indices.len());
        for index in indices {
            guards.push(self.stripes[index].lock().await);
        }
        guards
    }
}

impl Default for AggregateLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
