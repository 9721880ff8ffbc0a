//! Integration tests for `PgSnapshotRepository`.

use chronicle_event_store::PgSnapshotRepository;
use chronicle_test_support::contract;
use sqlx::PgPool;

#[sqlx::test(migrations = "../../migrations")]
async fn test_snapshot_round_trip(pool: PgPool) {
    contract::snapshot_round_trip(&PgSnapshotRepository::new(pool)).await;
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_snapshot_offset_round_trip(pool: PgPool) {
    contract::snapshot_offset_round_trip(&PgSnapshotRepository::new(pool)).await;
}
