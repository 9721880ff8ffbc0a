//! Command line surface.
//!
//! Every command prints one JSON document per line on the given writer.

use std::io::Write;

use chrono::{DateTime, Utc};
use chronicle_core::event::{Action, EventEntry};
use chronicle_core::query::{EventFilter, TransactionPredicate};
use chronicle_core::repository::EventLog;
use chronicle_core::snapshot::SnapshotEntry;
use chronicle_event_store::MIGRATOR;
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Inspect and maintain a chronicle event store
#[derive(Debug, Parser)]
#[command(name = "chronicle")]
#[command(about = "Inspect and maintain a chronicle event store", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply pending schema migrations
    Migrate,

    /// Print the global event log offset
    Offset,

    /// List an aggregate's events, oldest first
    Events {
        /// Aggregate to list
        #[arg(value_name = "AGGREGATE")]
        aggregate: Uuid,

        /// Also include this transaction's staged events
        #[arg(short, long, value_name = "TRANSACTION")]
        transaction: Option<Uuid>,
    },

    /// Print an aggregate's current state
    Show {
        /// Aggregate to materialize
        #[arg(value_name = "AGGREGATE")]
        aggregate: Uuid,

        /// View the aggregate from inside this transaction
        #[arg(short, long, value_name = "TRANSACTION")]
        transaction: Option<Uuid>,
    },

    /// Print a transaction's status
    Transaction {
        /// Transaction to look up
        #[arg(value_name = "UUID")]
        uuid: Uuid,
    },

    /// Reject a transaction that is stuck before commit
    Reject {
        /// Transaction to reject
        #[arg(value_name = "UUID")]
        uuid: Uuid,
    },

    /// Bring persisted snapshots up to the current log offset
    SyncSnapshots,
}

#[derive(Debug, Serialize)]
struct EventView {
    id: i64,
    aggregate_uuid: Uuid,
    aggregate_name: String,
    version: i64,
    action: Action,
    transaction_uuid: Option<Uuid>,
    created_at: DateTime<Utc>,
    data: Value,
}

impl From<EventEntry> for EventView {
    fn from(entry: EventEntry) -> Self {
        Self {
            id: entry.id,
            aggregate_uuid: entry.aggregate_uuid,
            aggregate_name: entry.aggregate_name,
            version: entry.version,
            action: entry.action,
            transaction_uuid: entry.transaction_uuid,
            created_at: entry.created_at,
            data: payload(&entry.data),
        }
    }
}

#[derive(Debug, Serialize)]
struct SnapshotView {
    aggregate_uuid: Uuid,
    aggregate_name: String,
    version: i64,
    transaction_uuid: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    data: Value,
}

impl From<SnapshotEntry> for SnapshotView {
    fn from(snapshot: SnapshotEntry) -> Self {
        Self {
            aggregate_uuid: snapshot.aggregate_uuid,
            aggregate_name: snapshot.aggregate_name,
            version: snapshot.version,
            transaction_uuid: snapshot.transaction_uuid,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            data: snapshot.data.as_deref().map_or(Value::Null, payload),
        }
    }
}

/// Payloads are opaque bytes; show them as JSON when they are JSON.
fn payload(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn emit<T: Serialize>(out: &mut dyn Write, value: &T) -> Result<(), AppError> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

impl Command {
    /// Runs the command against `state`, writing results to `out`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` for store failures (including not-found
    /// conditions), `AppError::Migration` for migration failures, and
    /// `AppError::Config` when `migrate` runs without a database.
    pub async fn execute(self, state: &AppState, out: &mut dyn Write) -> Result<(), AppError> {
        match self {
            Self::Migrate => {
                let pool = state
                    .db_pool
                    .as_ref()
                    .ok_or_else(|| AppError::Config("migrate needs a database pool".into()))?;
                MIGRATOR.run(pool).await?;
                info!("migrations applied");
                emit(out, &serde_json::json!({ "migrated": true }))
            }
            Self::Offset => {
                let offset = state.manager.events().offset().await?;
                emit(out, &serde_json::json!({ "offset": offset }))
            }
            Self::Events {
                aggregate,
                transaction,
            } => {
                let mut stream = state.manager.events().select(
                    EventFilter::new()
                        .aggregate(aggregate)
                        .transaction(TransactionPredicate::visible_to(transaction)),
                );
                while let Some(entry) = stream.try_next().await? {
                    emit(out, &EventView::from(entry))?;
                }
                Ok(())
            }
            Self::Show {
                aggregate,
                transaction,
            } => {
                let snapshot = state.materializer.get(aggregate, transaction).await?;
                emit(out, &SnapshotView::from(snapshot))
            }
            Self::Transaction { uuid } => {
                let entry = state.manager.get(uuid).await?;
                emit(out, &entry)
            }
            Self::Reject { uuid } => {
                let entry = state.manager.reject(uuid).await?;
                emit(out, &entry)
            }
            Self::SyncSnapshots => {
                let report = state.materializer.synchronize().await?;
                emit(
                    out,
                    &serde_json::json!({
                        "aggregates": report.aggregates,
                        "offset": report.offset,
                    }),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chronicle_core::error::StoreError;
    use chronicle_core::event::NewEvent;
    use chronicle_core::transaction::TransactionStatus;
    use chronicle_event_store::{
        InMemoryEventLog, InMemorySnapshotRepository, InMemoryTransactionRepository,
    };

    use super::*;
    use crate::config::Config;

    fn state() -> AppState {
        let config = Config {
            database_url: "postgres://unused".into(),
            max_connections: 1,
            lock_stripes: 4,
            snapshot_cache: true,
        };
        AppState::new(
            Arc::new(InMemoryEventLog::new()),
            Arc::new(InMemoryTransactionRepository::new()),
            Arc::new(InMemorySnapshotRepository::new()),
            &config,
        )
    }

    async fn run(state: &AppState, command: Command) -> Result<Vec<Value>, AppError> {
        let mut out = Vec::new();
        command.execute(state, &mut out).await?;
        Ok(String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect())
    }

    fn create(aggregate_uuid: Uuid, data: &str) -> NewEvent {
        NewEvent::new(aggregate_uuid, "Order", Action::Create, data.as_bytes().to_vec())
    }

    #[test]
    fn test_cli_parses_events_with_transaction() {
        let agg = Uuid::new_v4();
        let tx = Uuid::new_v4();

        let cli = Cli::try_parse_from([
            "chronicle",
            "events",
            &agg.to_string(),
            "--transaction",
            &tx.to_string(),
        ])
        .unwrap();

        assert!(matches!(
            cli.command,
            Command::Events { aggregate, transaction: Some(t) } if aggregate == agg && t == tx
        ));
    }

    #[test]
    fn test_cli_rejects_malformed_uuid() {
        assert!(Cli::try_parse_from(["chronicle", "show", "not-a-uuid"]).is_err());
    }

    #[tokio::test]
    async fn test_offset_reports_log_length() {
        // Arrange
        let state = state();
        state
            .manager
            .stage(None, create(Uuid::new_v4(), "{}"))
            .await
            .unwrap();

        // Act
        let lines = run(&state, Command::Offset).await.unwrap();

        // Assert
        assert_eq!(lines, vec![serde_json::json!({ "offset": 1 })]);
    }

    #[tokio::test]
    async fn test_events_lists_visible_entries() {
        // Arrange
        let state = state();
        let agg = Uuid::new_v4();
        state.manager.stage(None, create(agg, r#"{"n":1}"#)).await.unwrap();
        let tx = state.manager.begin(true).await.unwrap();
        state
            .manager
            .stage(
                Some(tx.uuid),
                NewEvent::new(agg, "Order", Action::Update, b"raw bytes".to_vec()),
            )
            .await
            .unwrap();

        // Act
        let main = run(&state, Command::Events { aggregate: agg, transaction: None })
            .await
            .unwrap();
        let own = run(
            &state,
            Command::Events {
                aggregate: agg,
                transaction: Some(tx.uuid),
            },
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(main.len(), 1);
        assert_eq!(main[0]["data"], serde_json::json!({ "n": 1 }));
        assert_eq!(own.len(), 2);
        assert_eq!(own[1]["data"], "raw bytes");
        assert_eq!(own[1]["action"], "update");
    }

    #[tokio::test]
    async fn test_show_prints_state() {
        let state = state();
        let agg = Uuid::new_v4();
        state.manager.stage(None, create(agg, r#"{"n":1}"#)).await.unwrap();

        let lines = run(&state, Command::Show { aggregate: agg, transaction: None })
            .await
            .unwrap();

        assert_eq!(lines[0]["version"], 1);
        assert_eq!(lines[0]["data"], serde_json::json!({ "n": 1 }));
    }

    #[tokio::test]
    async fn test_show_unknown_aggregate_fails() {
        let state = state();

        let result = run(
            &state,
            Command::Show {
                aggregate: Uuid::new_v4(),
                transaction: None,
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(AppError::Store(StoreError::AggregateNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_transaction_and_reject() {
        // Arrange
        let state = state();
        let tx = state.manager.begin(false).await.unwrap();

        // Act
        let before = run(&state, Command::Transaction { uuid: tx.uuid }).await.unwrap();
        run(&state, Command::Reject { uuid: tx.uuid }).await.unwrap();

        // Assert
        assert_eq!(before[0]["status"], "pending");
        assert_eq!(
            state.manager.get(tx.uuid).await.unwrap().status,
            TransactionStatus::Rejected
        );
    }

    #[tokio::test]
    async fn test_sync_snapshots_reports_progress() {
        let state = state();
        state
            .manager
            .stage(None, create(Uuid::new_v4(), "{}"))
            .await
            .unwrap();

        let lines = run(&state, Command::SyncSnapshots).await.unwrap();

        assert_eq!(lines, vec![serde_json::json!({ "aggregates": 1, "offset": 1 })]);
    }

    #[tokio::test]
    async fn test_migrate_without_database_fails() {
        let result = run(&state(), Command::Migrate).await;

        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
