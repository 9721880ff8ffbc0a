//! `PostgreSQL` implementation of the `TransactionRepository` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_core::error::StoreError;
use chronicle_core::repository::TransactionRepository;
use chronicle_core::transaction::{TransactionEntry, TransactionFilter, TransactionStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::infrastructure;
use crate::query_builder;
use crate::schema::TRANSACTION_COLUMNS;

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    uuid: Uuid,
    status: String,
    event_offset: Option<i64>,
    autocommit: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for TransactionEntry {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            uuid: row.uuid,
            status: row.status.parse()?,
            event_offset: row.event_offset,
            autocommit: row.autocommit,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL-backed transaction table.
#[derive(Debug, Clone)]
pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    /// Creates a new `PgTransactionRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn insert(&self, entry: &TransactionEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO transactions \
             (uuid, status, event_offset, autocommit, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.uuid)
        .bind(entry.status.as_str())
        .bind(entry.event_offset)
        .bind(entry.autocommit)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(infrastructure)?;
        Ok(())
    }

    async fn get(&self, uuid: Uuid) -> Result<Option<TransactionEntry>, StoreError> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE uuid = $1"
        ))
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(infrastructure)?;
        row.map(TransactionEntry::try_from).transpose()
    }

    async fn save(
        &self,
        entry: &TransactionEntry,
        expected: TransactionStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE transactions SET status = $2, event_offset = $3, updated_at = $4 \
             WHERE uuid = $1 AND status = $5",
        )
        .bind(entry.uuid)
        .bind(entry.status.as_str())
        .bind(entry.event_offset)
        .bind(entry.updated_at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(infrastructure)?;

        if result.rows_affected() == 0 {
            return match self.get(entry.uuid).await? {
                Some(current) => Err(StoreError::stale_status(entry.uuid, current.status)),
                None => Err(StoreError::TransactionNotFound(entry.uuid)),
            };
        }
        Ok(())
    }

    async fn select(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<TransactionEntry>, StoreError> {
        let mut builder = query_builder::select_transactions(filter);
        let rows: Vec<TransactionRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(infrastructure)?;
        rows.into_iter().map(TransactionEntry::try_from).collect()
    }
}
