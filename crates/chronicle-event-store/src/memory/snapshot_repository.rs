use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chronicle_core::error::StoreError;
use chronicle_core::repository::SnapshotRepository;
use chronicle_core::snapshot::SnapshotEntry;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Snapshots {
    rows: HashMap<Uuid, SnapshotEntry>,
    offset: i64,
}

/// In-memory [`SnapshotRepository`].
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotRepository {
    inner: Arc<RwLock<Snapshots>>,
}

impl InMemorySnapshotRepository {
    /// Creates an empty snapshot table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotRepository for InMemorySnapshotRepository {
    async fn store(&self, entry: &SnapshotEntry) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .rows
            .insert(entry.aggregate_uuid, entry.clone());
        Ok(())
    }

    async fn get(&self, aggregate_uuid: Uuid) -> Result<Option<SnapshotEntry>, StoreError> {
        Ok(self.inner.read().await.rows.get(&aggregate_uuid).cloned())
    }

    async fn offset(&self) -> Result<i64, StoreError> {
        Ok(self.inner.read().await.offset)
    }

    async fn store_offset(&self, offset: i64) -> Result<(), StoreError> {
        self.inner.write().await.offset = offset;
        Ok(())
    }
}
