//! Snapshot synchronization against PostgreSQL.

use std::sync::Arc;

use chronicle_core::event::{Action, NewEvent};
use chronicle_core::repository::{EventLog, SnapshotRepository};
use chronicle_event_store::{PgEventLog, PgSnapshotRepository};
use chronicle_snapshots::{SnapshotMaterializer, SyncReport};
use sqlx::PgPool;
use uuid::Uuid;

fn event(aggregate_uuid: Uuid, action: Action, data: &str) -> NewEvent {
    NewEvent::new(aggregate_uuid, "Account", action, data.as_bytes().to_vec())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_synchronize_persists_main_line(pool: PgPool) {
    // Arrange
    let events = Arc::new(PgEventLog::new(pool.clone()));
    let snapshots = Arc::new(PgSnapshotRepository::new(pool));
    let agg = Uuid::new_v4();
    events.append(event(agg, Action::Create, r#"{"n":1}"#)).await.unwrap();
    events.append(event(agg, Action::Update, r#"{"n":2}"#)).await.unwrap();
    let materializer =
        SnapshotMaterializer::new(events.clone()).with_repository(snapshots.clone());

    // Act
    let report = materializer.synchronize().await.unwrap();

    // Assert
    assert_eq!(report, SyncReport { aggregates: 1, offset: 2 });
    assert_eq!(snapshots.offset().await.unwrap(), 2);
    let stored = snapshots.get(agg).await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(stored.data.as_deref().unwrap()).unwrap(),
        serde_json::json!({ "n": 2 })
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_get_resumes_from_persisted_snapshot(pool: PgPool) {
    // Arrange
    let events = Arc::new(PgEventLog::new(pool.clone()));
    let snapshots = Arc::new(PgSnapshotRepository::new(pool));
    let agg = Uuid::new_v4();
    events.append(event(agg, Action::Create, r#"{"n":1}"#)).await.unwrap();
    let materializer = SnapshotMaterializer::new(events.clone())
        .with_repository(snapshots)
        .with_cache(false);
    materializer.synchronize().await.unwrap();
    events.append(event(agg, Action::Delete, "{}")).await.unwrap();

    // Act
    let result = materializer.get(agg, None).await;

    // Assert
    assert!(matches!(
        result,
        Err(chronicle_core::error::StoreError::DeletedAggregate(_))
    ));
}
