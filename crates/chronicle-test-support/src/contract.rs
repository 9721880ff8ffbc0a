//! Contract tests every storage backend must pass.
//!
//! Each function drives a fresh, empty backend through one scenario and
//! panics on the first violated expectation. Backends call them from their
//! own test modules, e.g. `contract::gap_is_rejected(&log).await`.
#![allow(clippy::missing_panics_doc)]

use chrono::TimeDelta;
use chronicle_core::error::StoreError;
use chronicle_core::event::{Action, EventEntry, NewEvent};
use chronicle_core::query::{EventFilter, Order, TransactionPredicate};
use chronicle_core::repository::{AppendMode, EventLog, SnapshotRepository, TransactionRepository};
use chronicle_core::snapshot::SnapshotEntry;
use chronicle_core::transaction::{TransactionEntry, TransactionFilter, TransactionStatus};
use futures::TryStreamExt;
use uuid::Uuid;

use crate::FixedClock;

const NAME: &str = "shop.Order";

fn event(aggregate_uuid: Uuid, action: Action) -> NewEvent {
    NewEvent::new(aggregate_uuid, NAME, action, br#"{"k":1}"#.to_vec())
}

fn versions(entries: &[EventEntry]) -> Vec<i64> {
    entries.iter().map(|e| e.version).collect()
}

async fn committed(log: &dyn EventLog, aggregate_uuid: Uuid) -> Vec<EventEntry> {
    log.select_all(
        EventFilter::new()
            .aggregate(aggregate_uuid)
            .transaction(TransactionPredicate::committed()),
    )
    .await
    .unwrap()
}

// --- event log ---

pub async fn empty_log_has_zero_offset(log: &dyn EventLog) {
    assert_eq!(log.offset().await.unwrap(), 0);
    assert!(log.select_all(EventFilter::new()).await.unwrap().is_empty());
}

pub async fn committed_versions_are_contiguous(log: &dyn EventLog) {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let first = log.append(event(a, Action::Create)).await.unwrap();
    log.append(event(b, Action::Create)).await.unwrap();
    log.append(event(a, Action::Update)).await.unwrap();
    let explicit = log
        .append(event(a, Action::Update).at_version(3))
        .await
        .unwrap();

    assert_eq!(first.version, 1);
    assert!(first.is_committed());
    assert_eq!(explicit.version, 3);
    assert_eq!(versions(&committed(log, a).await), vec![1, 2, 3]);
    assert_eq!(versions(&committed(log, b).await), vec![1]);

    let all = log.select_all(EventFilter::new()).await.unwrap();
    let ids: Vec<i64> = all.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_eq!(log.offset().await.unwrap(), 4);
}

pub async fn gap_is_rejected(log: &dyn EventLog) {
    let a = Uuid::new_v4();
    log.append(event(a, Action::Create)).await.unwrap();

    let gap = log.append(event(a, Action::Update).at_version(3)).await;
    match gap {
        Err(StoreError::VersionConflict {
            aggregate_uuid,
            expected,
            actual,
        }) => {
            assert_eq!(aggregate_uuid, a);
            assert_eq!(expected, 2);
            assert_eq!(actual, 3);
        }
        other => panic!("expected VersionConflict, got {other:?}"),
    }

    let duplicate = log.append(event(a, Action::Update).at_version(1)).await;
    assert!(matches!(duplicate, Err(StoreError::VersionConflict { .. })));
    assert_eq!(log.offset().await.unwrap(), 1);
}

pub async fn staged_versions_follow_own_view(log: &dyn EventLog) {
    let a = Uuid::new_v4();
    let t1 = Uuid::new_v4();
    let t2 = Uuid::new_v4();
    log.append(event(a, Action::Create)).await.unwrap();

    let t1_first = log
        .append(event(a, Action::Update).in_transaction(t1))
        .await
        .unwrap();
    let t1_second = log
        .append(event(a, Action::Update).in_transaction(t1))
        .await
        .unwrap();
    let t2_first = log
        .append(event(a, Action::Update).in_transaction(t2))
        .await
        .unwrap();

    assert_eq!(t1_first.version, 2);
    assert_eq!(t1_second.version, 3);
    assert_eq!(t2_first.version, 2);
    assert_eq!(t2_first.transaction_uuid, Some(t2));
    assert_eq!(versions(&committed(log, a).await), vec![1]);

    let staged = log
        .select_all(EventFilter::new().transaction(TransactionPredicate::Eq(t1)))
        .await
        .unwrap();
    assert_eq!(versions(&staged), vec![2, 3]);
}

pub async fn commit_batch_is_atomic(log: &dyn EventLog) {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let loser = Uuid::new_v4();
    let winner = Uuid::new_v4();
    log.append(event(a, Action::Create)).await.unwrap();
    let staged = log
        .append_all(
            vec![
                event(b, Action::Create).in_transaction(loser),
                event(a, Action::Update).in_transaction(loser),
                event(a, Action::Update).in_transaction(loser),
            ],
            AppendMode::Plain,
        )
        .await
        .unwrap();
    log.append(event(a, Action::Update)).await.unwrap();
    let before = log.offset().await.unwrap();

    let result = log
        .append_all(
            staged.iter().map(EventEntry::to_committed).collect(),
            AppendMode::Commit(loser),
        )
        .await;

    match result {
        Err(StoreError::RepositoryConflict {
            transaction_uuid, ..
        }) => assert_eq!(transaction_uuid, loser),
        other => panic!("expected RepositoryConflict, got {other:?}"),
    }
    assert_eq!(log.offset().await.unwrap(), before);
    assert_eq!(versions(&committed(log, a).await), vec![1, 2]);
    assert!(committed(log, b).await.is_empty());

    let c = Uuid::new_v4();
    let staged = log
        .append_all(
            vec![
                event(c, Action::Create).in_transaction(winner),
                event(c, Action::Update).in_transaction(winner),
            ],
            AppendMode::Plain,
        )
        .await
        .unwrap();
    let appended = log
        .append_all(
            staged.iter().map(EventEntry::to_committed).collect(),
            AppendMode::Commit(winner),
        )
        .await
        .unwrap();
    assert_eq!(versions(&appended), vec![1, 2]);
    assert!(appended.iter().all(EventEntry::is_committed));
    assert_eq!(versions(&committed(log, c).await), vec![1, 2]);
}

pub async fn select_filters_and_paginates(log: &dyn EventLog) {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let t = Uuid::new_v4();
    for _ in 0..3 {
        log.append(event(a, Action::Update)).await.unwrap();
    }
    for _ in 0..2 {
        log.append(NewEvent::new(b, "shop.Invoice", Action::Update, Vec::new()))
            .await
            .unwrap();
    }
    log.append(event(a, Action::Update).in_transaction(t))
        .await
        .unwrap();

    let by_name = log
        .select_all(EventFilter::new().aggregate_name("shop.Invoice"))
        .await
        .unwrap();
    assert_eq!(by_name.len(), 2);
    assert!(by_name.iter().all(|e| e.aggregate_uuid == b));

    let version_range = log
        .select_all(EventFilter::new().aggregate(a).version_gt(1).version_le(4))
        .await
        .unwrap();
    assert_eq!(versions(&version_range), vec![2, 3, 4]);

    let id_range = log
        .select_all(EventFilter::new().id_gt(2).id_le(4))
        .await
        .unwrap();
    let ids: Vec<i64> = id_range.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![3, 4]);

    let others = log
        .select_all(EventFilter::new().aggregate(a).transaction(TransactionPredicate::Ne(t)))
        .await
        .unwrap();
    assert_eq!(others.len(), 3);

    let visible = log
        .select_all(
            EventFilter::new()
                .aggregate(a)
                .transaction(TransactionPredicate::visible_to(Some(t))),
        )
        .await
        .unwrap();
    assert_eq!(visible.len(), 4);

    let latest = log
        .select_all(EventFilter::new().order(Order::Descending).limit(1))
        .await
        .unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].id, 6);
    assert_eq!(latest[0].transaction_uuid, Some(t));

    let page = log
        .select_all(EventFilter::new().skip(2).limit(2))
        .await
        .unwrap();
    let ids: Vec<i64> = page.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![3, 4]);
}

pub async fn select_is_restartable(log: &dyn EventLog) {
    let a = Uuid::new_v4();
    log.append(event(a, Action::Create)).await.unwrap();
    let filter = EventFilter::new().aggregate(a);

    let first: Vec<EventEntry> = log.select(filter.clone()).try_collect().await.unwrap();
    let second: Vec<EventEntry> = log.select(filter.clone()).try_collect().await.unwrap();
    assert_eq!(first, second);

    log.append(event(a, Action::Update)).await.unwrap();
    let third: Vec<EventEntry> = log.select(filter).try_collect().await.unwrap();
    assert_eq!(third.len(), 2);
}

// --- transaction table ---

fn transaction(autocommit: bool) -> TransactionEntry {
    TransactionEntry::new(Uuid::new_v4(), autocommit, FixedClock::epoch().0)
}

pub async fn transaction_round_trip(repo: &dyn TransactionRepository) {
    let entry = transaction(true);
    repo.insert(&entry).await.unwrap();
    assert_eq!(repo.get(entry.uuid).await.unwrap(), Some(entry.clone()));

    let later = entry.created_at + TimeDelta::seconds(5);
    let reserved = entry.transitioned(TransactionStatus::Reserved, Some(12), later);
    repo.save(&reserved, TransactionStatus::Pending).await.unwrap();
    assert_eq!(repo.get(entry.uuid).await.unwrap(), Some(reserved));

    assert!(repo.insert(&entry).await.is_err());
    assert_eq!(repo.get(Uuid::new_v4()).await.unwrap(), None);
}

pub async fn transaction_select_by_uuid_and_status(repo: &dyn TransactionRepository) {
    let now = FixedClock::epoch().0;
    let pending = transaction(true);
    let reserved = transaction(false);
    let rejected = transaction(true);
    for entry in [&pending, &reserved, &rejected] {
        repo.insert(entry).await.unwrap();
    }
    repo.save(
        &reserved.transitioned(TransactionStatus::Reserved, Some(1), now),
        TransactionStatus::Pending,
    )
    .await
    .unwrap();
    repo.save(
        &rejected.transitioned(TransactionStatus::Rejected, Some(1), now),
        TransactionStatus::Pending,
    )
    .await
    .unwrap();

    let claiming = repo
        .select(
            &TransactionFilter::new()
                .uuid_in([pending.uuid, reserved.uuid, rejected.uuid])
                .status_in(TransactionStatus::CLAIMING),
        )
        .await
        .unwrap();
    assert_eq!(claiming.len(), 1);
    assert_eq!(claiming[0].uuid, reserved.uuid);
    assert_eq!(claiming[0].status, TransactionStatus::Reserved);

    let by_uuid = repo
        .select(&TransactionFilter::new().uuid_in([pending.uuid]))
        .await
        .unwrap();
    assert_eq!(by_uuid.len(), 1);
    assert_eq!(by_uuid[0].status, TransactionStatus::Pending);

    assert_eq!(repo.select(&TransactionFilter::new()).await.unwrap().len(), 3);
}

pub async fn stale_status_save_fails(repo: &dyn TransactionRepository) {
    let now = FixedClock::epoch().0;
    let entry = transaction(true);
    repo.insert(&entry).await.unwrap();
    let committing = entry.transitioned(TransactionStatus::Committing, None, now);
    repo.save(&committing, TransactionStatus::Pending).await.unwrap();
    let rejected = committing.transitioned(TransactionStatus::Rejected, Some(3), now);
    repo.save(&rejected, TransactionStatus::Committing).await.unwrap();

    // A writer still holding the Committing row must not overwrite the
    // terminal status.
    let committed = committing.transitioned(TransactionStatus::Committed, Some(4), now);
    let result = repo.save(&committed, TransactionStatus::Committing).await;

    match result {
        Err(StoreError::InvalidTransactionStatus {
            transaction_uuid,
            status,
            ..
        }) => {
            assert_eq!(transaction_uuid, entry.uuid);
            assert_eq!(status, TransactionStatus::Rejected);
        }
        other => panic!("expected InvalidTransactionStatus, got {other:?}"),
    }
    assert_eq!(repo.get(entry.uuid).await.unwrap(), Some(rejected));
}

pub async fn saving_unknown_transaction_fails(repo: &dyn TransactionRepository) {
    let entry = transaction(true);

    let result = repo.save(&entry, TransactionStatus::Pending).await;

    match result {
        Err(StoreError::TransactionNotFound(uuid)) => assert_eq!(uuid, entry.uuid),
        other => panic!("expected TransactionNotFound, got {other:?}"),
    }
}

// --- snapshot table ---

fn snapshot(aggregate_uuid: Uuid, version: i64, data: Option<&[u8]>) -> SnapshotEntry {
    let now = FixedClock::epoch().0;
    SnapshotEntry {
        aggregate_uuid,
        aggregate_name: NAME.to_owned(),
        version,
        schema: b"json".to_vec(),
        data: data.map(<[u8]>::to_vec),
        created_at: now,
        updated_at: now + TimeDelta::seconds(version),
        transaction_uuid: None,
    }
}

pub async fn snapshot_round_trip(repo: &dyn SnapshotRepository) {
    let a = Uuid::new_v4();
    assert_eq!(repo.get(a).await.unwrap(), None);

    let first = snapshot(a, 1, Some(br#"{"k":1}"#));
    repo.store(&first).await.unwrap();
    assert_eq!(repo.get(a).await.unwrap(), Some(first));

    let tombstone = snapshot(a, 2, None);
    repo.store(&tombstone).await.unwrap();
    let loaded = repo.get(a).await.unwrap().unwrap();
    assert!(loaded.is_deleted());
    assert_eq!(loaded, tombstone);
}

pub async fn snapshot_offset_round_trip(repo: &dyn SnapshotRepository) {
    assert_eq!(repo.offset().await.unwrap(), 0);

    repo.store_offset(42).await.unwrap();
    assert_eq!(repo.offset().await.unwrap(), 42);

    repo.store_offset(50).await.unwrap();
    assert_eq!(repo.offset().await.unwrap(), 50);
}
