//! `PostgreSQL` implementation of the `SnapshotRepository` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_core::error::StoreError;
use chronicle_core::repository::SnapshotRepository;
use chronicle_core::snapshot::SnapshotEntry;
use sqlx::PgPool;
use uuid::Uuid;

use crate::infrastructure;
use crate::schema::SNAPSHOT_COLUMNS;

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    aggregate_uuid: Uuid,
    aggregate_name: String,
    version: i64,
    schema: Vec<u8>,
    data: Option<Vec<u8>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SnapshotRow> for SnapshotEntry {
    fn from(row: SnapshotRow) -> Self {
        Self {
            aggregate_uuid: row.aggregate_uuid,
            aggregate_name: row.aggregate_name,
            version: row.version,
            schema: row.schema,
            data: row.data,
            created_at: row.created_at,
            updated_at: row.updated_at,
            transaction_uuid: None,
        }
    }
}

/// PostgreSQL-backed table of main-line snapshots.
#[derive(Debug, Clone)]
pub struct PgSnapshotRepository {
    pool: PgPool,
}

impl PgSnapshotRepository {
    /// Creates a new `PgSnapshotRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotRepository for PgSnapshotRepository {
    async fn store(&self, entry: &SnapshotEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO snapshots \
             (aggregate_uuid, aggregate_name, version, schema, data, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (aggregate_uuid) DO UPDATE SET \
             aggregate_name = EXCLUDED.aggregate_name, version = EXCLUDED.version, \
             schema = EXCLUDED.schema, data = EXCLUDED.data, \
             created_at = EXCLUDED.created_at, updated_at = EXCLUDED.updated_at",
        )
        .bind(entry.aggregate_uuid)
        .bind(&entry.aggregate_name)
        .bind(entry.version)
        .bind(&entry.schema)
        .bind(entry.data.as_deref())
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(infrastructure)?;
        Ok(())
    }

    async fn get(&self, aggregate_uuid: Uuid) -> Result<Option<SnapshotEntry>, StoreError> {
        let row: Option<SnapshotRow> = sqlx::query_as(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE aggregate_uuid = $1"
        ))
        .bind(aggregate_uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(infrastructure)?;
        Ok(row.map(SnapshotEntry::from))
    }

    async fn offset(&self) -> Result<i64, StoreError> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM snapshot_offset")
            .fetch_optional(&self.pool)
            .await
            .map_err(infrastructure)?;
        Ok(value.unwrap_or(0))
    }

    async fn store_offset(&self, offset: i64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO snapshot_offset (singleton, value) VALUES (TRUE, $1) \
             ON CONFLICT (singleton) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(offset)
        .execute(&self.pool)
        .await
        .map_err(infrastructure)?;
        Ok(())
    }
}
