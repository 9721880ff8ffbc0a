use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chronicle_core::clock::{Clock, SystemClock};
use chronicle_core::error::StoreError;
use chronicle_core::event::{EventEntry, NewEvent};
use chronicle_core::query::{EventFilter, Order};
use chronicle_core::repository::{AppendMode, EventLog, EventStream, next_committed_version};
use futures::{StreamExt, TryStreamExt, stream};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Arena {
    entries: Vec<EventEntry>,
    by_aggregate: HashMap<Uuid, Vec<usize>>,
    committed: HashMap<(Uuid, i64), usize>,
    heads: HashMap<Uuid, i64>,
}

impl Arena {
    fn head(&self, aggregate_uuid: Uuid) -> i64 {
        self.heads.get(&aggregate_uuid).copied().unwrap_or(0)
    }

    /// Highest version visible to `transaction_uuid`: main line plus its own
    /// staged entries.
    fn view_head(&self, aggregate_uuid: Uuid, transaction_uuid: Uuid) -> i64 {
        self.by_aggregate
            .get(&aggregate_uuid)
            .into_iter()
            .flatten()
            .map(|&slot| &self.entries[slot])
            .filter(|e| e.transaction_uuid.is_none_or(|t| t == transaction_uuid))
            .map(|e| e.version)
            .max()
            .unwrap_or(0)
    }

    fn query(&self, filter: &EventFilter) -> Vec<EventEntry> {
        let slots: Box<dyn DoubleEndedIterator<Item = usize> + '_> = match filter.aggregate_uuid {
            Some(aggregate_uuid) => Box::new(
                self.by_aggregate
                    .get(&aggregate_uuid)
                    .map(Vec::as_slice)
                    .unwrap_or_default()
                    .iter()
                    .copied(),
            ),
            None => Box::new(0..self.entries.len()),
        };
        let slots: Box<dyn Iterator<Item = usize> + '_> = match filter.order {
            Order::Ascending => slots,
            Order::Descending => Box::new(slots.rev()),
        };

        slots
            .map(|slot| &self.entries[slot])
            .filter(|entry| filter.matches(entry))
            .skip(filter.skip)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    #[allow(clippy::cast_possible_wrap)]
    fn push(&mut self, entry: EventEntry) {
        let slot = self.entries.len();
        debug_assert_eq!(entry.id, slot as i64 + 1);
        self.by_aggregate
            .entry(entry.aggregate_uuid)
            .or_default()
            .push(slot);
        if entry.is_committed() {
            self.committed
                .insert((entry.aggregate_uuid, entry.version), slot);
            self.heads.insert(entry.aggregate_uuid, entry.version);
        }
        self.entries.push(entry);
    }
}

/// Arena-backed, in-memory [`EventLog`].
#[derive(Debug, Clone)]
pub struct InMemoryEventLog {
    arena: Arc<RwLock<Arena>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryEventLog {
    /// Creates an empty log stamping entries with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty log stamping entries with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            arena: Arc::new(RwLock::new(Arena::default())),
            clock,
        }
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    #[allow(clippy::cast_possible_wrap)]
    async fn append_all(
        &self,
        events: Vec<NewEvent>,
        mode: AppendMode,
    ) -> Result<Vec<EventEntry>, StoreError> {
        let mut arena = self.arena.write().await;
        let created_at = self.clock.now();

        // Validate the whole batch before touching the arena.
        let mut heads: HashMap<Uuid, i64> = HashMap::new();
        let mut view_heads: HashMap<(Uuid, Uuid), i64> = HashMap::new();
        let mut planned = Vec::with_capacity(events.len());
        for event in events {
            let aggregate_uuid = event.aggregate_uuid;
            let version = match event.transaction_uuid {
                None => {
                    let current = heads
                        .get(&aggregate_uuid)
                        .copied()
                        .unwrap_or_else(|| arena.head(aggregate_uuid));
                    let occupied = event
                        .version
                        .is_some_and(|v| arena.committed.contains_key(&(aggregate_uuid, v)));
                    let version = next_committed_version(&event, current, occupied, mode)?;
                    heads.insert(aggregate_uuid, version);
                    version
                }
                Some(transaction_uuid) => {
                    let key = (aggregate_uuid, transaction_uuid);
                    let current = view_heads
                        .get(&key)
                        .copied()
                        .unwrap_or_else(|| arena.view_head(aggregate_uuid, transaction_uuid))
                        .max(heads.get(&aggregate_uuid).copied().unwrap_or(0));
                    let version = event.version.unwrap_or(current + 1);
                    view_heads.insert(key, current.max(version));
                    version
                }
            };
            planned.push((event, version));
        }

        let mut appended = Vec::with_capacity(planned.len());
        for (event, version) in planned {
            let entry = EventEntry {
                id: arena.entries.len() as i64 + 1,
                aggregate_uuid: event.aggregate_uuid,
                aggregate_name: event.aggregate_name,
                version,
                data: event.data,
                action: event.action,
                created_at,
                transaction_uuid: event.transaction_uuid,
            };
            arena.push(entry.clone());
            appended.push(entry);
        }

        tracing::debug!(count = appended.len(), offset = arena.entries.len(), "appended events");
        Ok(appended)
    }

    fn select(&self, filter: EventFilter) -> EventStream<'_> {
        let arena = Arc::clone(&self.arena);
        stream::once(async move {
            let entries = arena.read().await.query(&filter);
            Ok::<_, StoreError>(stream::iter(entries.into_iter().map(Ok)))
        })
        .try_flatten()
        .boxed()
    }

    #[allow(clippy::cast_possible_wrap)]
    async fn offset(&self) -> Result<i64, StoreError> {
        Ok(self.arena.read().await.entries.len() as i64)
    }
}
