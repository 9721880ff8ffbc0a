use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chronicle_core::error::StoreError;
use chronicle_core::repository::TransactionRepository;
use chronicle_core::transaction::{TransactionEntry, TransactionFilter, TransactionStatus};
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory [`TransactionRepository`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransactionRepository {
    rows: Arc<RwLock<HashMap<Uuid, TransactionEntry>>>,
}

impl InMemoryTransactionRepository {
    /// Creates an empty transaction table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn insert(&self, entry: &TransactionEntry) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&entry.uuid) {
            return Err(StoreError::Infrastructure(format!(
                "transaction {} already exists",
                entry.uuid
            )));
        }
        rows.insert(entry.uuid, entry.clone());
        Ok(())
    }

    async fn get(&self, uuid: Uuid) -> Result<Option<TransactionEntry>, StoreError> {
        Ok(self.rows.read().await.get(&uuid).cloned())
    }

    async fn save(
        &self,
        entry: &TransactionEntry,
        expected: TransactionStatus,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(&entry.uuid)
            .ok_or(StoreError::TransactionNotFound(entry.uuid))?;
        if row.status != expected {
            return Err(StoreError::stale_status(entry.uuid, row.status));
        }
        row.status = entry.status;
        row.event_offset = entry.event_offset;
        row.updated_at = entry.updated_at;
        Ok(())
    }

    async fn select(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<TransactionEntry>, StoreError> {
        let mut selected: Vec<TransactionEntry> = self
            .rows
            .read()
            .await
            .values()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        selected.sort_by_key(|entry| (entry.created_at, entry.uuid));
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use chronicle_test_support::contract;

    use super::*;

    #[tokio::test]
    async fn test_contract_transaction_round_trip() {
        contract::transaction_round_trip(&InMemoryTransactionRepository::new()).await;
    }

    #[tokio::test]
    async fn test_contract_transaction_select_by_uuid_and_status() {
        contract::transaction_select_by_uuid_and_status(&InMemoryTransactionRepository::new())
            .await;
    }

    #[tokio::test]
    async fn test_contract_stale_status_save_fails() {
        contract::stale_status_save_fails(&InMemoryTransactionRepository::new()).await;
    }

    #[tokio::test]
    async fn test_contract_saving_unknown_transaction_fails() {
        contract::saving_unknown_transaction_fails(&InMemoryTransactionRepository::new()).await;
    }
}
