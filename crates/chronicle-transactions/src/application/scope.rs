//! Scoped transactions.
//!
//! `TransactionManager::scoped` opens a transaction, hands its uuid to the
//! body and, when the body succeeds and the transaction was opened with
//! `autocommit`, commits it. A failing body leaves the transaction as it was;
//! callers decide whether to reject it. Scopes do not nest within a task.

use std::future::Future;

use chronicle_core::error::StoreError;
use chronicle_core::transaction::TransactionStatus;
use uuid::Uuid;

use super::manager::TransactionManager;

tokio::task_local! {
    static ACTIVE_TRANSACTION: Uuid;
}

impl TransactionManager {
    /// Runs `body` inside a fresh transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyInTransaction` when called from inside
    /// another scope, the body's own error unchanged, or any error raised by
    /// the closing commit.
    pub async fn scoped<F, Fut, T, E>(&self, autocommit: bool, body: F) -> Result<T, E>
    where
        F: FnOnce(Uuid) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        if let Ok(active) = ACTIVE_TRANSACTION.try_with(|uuid| *uuid) {
            return Err(StoreError::AlreadyInTransaction(active).into());
        }

        let entry = self.begin(autocommit).await?;
        let output = ACTIVE_TRANSACTION
            .scope(entry.uuid, body(entry.uuid))
            .await?;

        if entry.autocommit {
            let current = self.get(entry.uuid).await?;
            if matches!(
                current.status,
                TransactionStatus::Pending | TransactionStatus::Reserved
            ) {
                self.commit(entry.uuid).await?;
            }
        }
        Ok(output)
    }
}
