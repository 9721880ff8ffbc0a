//! `PostgreSQL` implementation of the `EventLog` trait.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_core::clock::{Clock, SystemClock};
use chronicle_core::error::StoreError;
use chronicle_core::event::{EventEntry, NewEvent};
use chronicle_core::query::EventFilter;
use chronicle_core::repository::{AppendMode, EventLog, EventStream, next_committed_version};
use futures::{StreamExt, TryStreamExt, stream};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::infrastructure;
use crate::query_builder;
use crate::schema::{EVENT_COLUMNS, LOG_APPEND_LOCK_KEY, aggregate_lock_key};

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: i64,
    aggregate_uuid: Uuid,
    aggregate_name: String,
    version: i64,
    data: Vec<u8>,
    action: String,
    created_at: DateTime<Utc>,
    transaction_uuid: Option<Uuid>,
}

impl TryFrom<EventRow> for EventEntry {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            aggregate_uuid: row.aggregate_uuid,
            aggregate_name: row.aggregate_name,
            version: row.version,
            data: row.data,
            action: row.action.parse()?,
            created_at: row.created_at,
            transaction_uuid: row.transaction_uuid,
        })
    }
}

/// PostgreSQL-backed event log.
///
/// Every batch runs in one SQL transaction holding the advisory locks of the
/// aggregates it touches, then the global append lock, so a failed check
/// anywhere in the batch rolls back every insert.
#[derive(Debug, Clone)]
pub struct PgEventLog {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgEventLog {
    /// Creates a new `PgEventLog` stamping entries with the system clock.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    /// Creates a new `PgEventLog` stamping entries with `clock`.
    #[must_use]
    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

async fn committed_head(conn: &mut PgConnection, aggregate_uuid: Uuid) -> Result<i64, StoreError> {
    sqlx::query_scalar(
        "SELECT COALESCE(MAX(version), 0) FROM event_log \
         WHERE aggregate_uuid = $1 AND transaction_uuid IS NULL",
    )
    .bind(aggregate_uuid)
    .fetch_one(conn)
    .await
    .map_err(infrastructure)
}

async fn committed_exists(
    conn: &mut PgConnection,
    aggregate_uuid: Uuid,
    version: i64,
) -> Result<bool, StoreError> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM event_log \
         WHERE aggregate_uuid = $1 AND version = $2 AND transaction_uuid IS NULL)",
    )
    .bind(aggregate_uuid)
    .bind(version)
    .fetch_one(conn)
    .await
    .map_err(infrastructure)
}

async fn view_head(
    conn: &mut PgConnection,
    aggregate_uuid: Uuid,
    transaction_uuid: Uuid,
) -> Result<i64, StoreError> {
    sqlx::query_scalar(
        "SELECT COALESCE(MAX(version), 0) FROM event_log \
         WHERE aggregate_uuid = $1 AND (transaction_uuid IS NULL OR transaction_uuid = $2)",
    )
    .bind(aggregate_uuid)
    .bind(transaction_uuid)
    .fetch_one(conn)
    .await
    .map_err(infrastructure)
}

async fn lock(conn: &mut PgConnection, key: i64) -> Result<(), StoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(key)
        .execute(conn)
        .await
        .map_err(infrastructure)?;
    Ok(())
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append_all(
        &self,
        events: Vec<NewEvent>,
        mode: AppendMode,
    ) -> Result<Vec<EventEntry>, StoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await.map_err(infrastructure)?;

        let mut keys: Vec<i64> = events
            .iter()
            .map(|e| aggregate_lock_key(e.aggregate_uuid))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        for key in keys {
            lock(&mut tx, key).await?;
        }
        lock(&mut tx, LOG_APPEND_LOCK_KEY).await?;

        let created_at = self.clock.now();
        let insert = format!(
            "INSERT INTO event_log \
             (aggregate_uuid, aggregate_name, version, data, action, created_at, transaction_uuid) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {EVENT_COLUMNS}"
        );
        let mut appended = Vec::with_capacity(events.len());
        for event in events {
            let version = match (event.transaction_uuid, event.version) {
                (None, supplied) => {
                    let current = committed_head(&mut tx, event.aggregate_uuid).await?;
                    let occupied = match supplied {
                        Some(version) => {
                            committed_exists(&mut tx, event.aggregate_uuid, version).await?
                        }
                        None => false,
                    };
                    next_committed_version(&event, current, occupied, mode)?
                }
                (Some(_), Some(version)) => version,
                (Some(transaction_uuid), None) => {
                    view_head(&mut tx, event.aggregate_uuid, transaction_uuid).await? + 1
                }
            };

            let row: EventRow = sqlx::query_as(&insert)
                .bind(event.aggregate_uuid)
                .bind(&event.aggregate_name)
                .bind(version)
                .bind(&event.data)
                .bind(event.action.as_str())
                .bind(created_at)
                .bind(event.transaction_uuid)
                .fetch_one(&mut *tx)
                .await
                .map_err(infrastructure)?;
            appended.push(EventEntry::try_from(row)?);
        }

        tx.commit().await.map_err(infrastructure)?;
        tracing::debug!(count = appended.len(), "appended events");
        Ok(appended)
    }

    fn select(&self, filter: EventFilter) -> EventStream<'_> {
        let pool = self.pool.clone();
        stream::once(async move {
            let mut builder = query_builder::select_events(&filter);
            let rows: Vec<EventRow> = builder
                .build_query_as()
                .fetch_all(&pool)
                .await
                .map_err(infrastructure)?;
            let entries = rows
                .into_iter()
                .map(EventEntry::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, StoreError>(stream::iter(entries.into_iter().map(Ok)))
        })
        .try_flatten()
        .boxed()
    }

    async fn offset(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM event_log")
            .fetch_one(&self.pool)
            .await
            .map_err(infrastructure)
    }
}
