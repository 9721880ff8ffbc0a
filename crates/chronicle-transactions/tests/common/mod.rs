//! Protocol scenarios shared by the in-memory and PostgreSQL test suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chronicle_core::error::StoreError;
use chronicle_core::event::{Action, EventEntry, NewEvent};
use chronicle_core::query::{EventFilter, TransactionPredicate};
use chronicle_core::repository::EventLog;
use chronicle_core::transaction::TransactionStatus;
use chronicle_transactions::TransactionManager;
use uuid::Uuid;

/// How long a delayed log holds commit batches and offset reads.
pub const LOG_DELAY: Duration = Duration::from_millis(200);

/// How long a scenario waits before starting the interleaved call.
const INTERLEAVE_AFTER: Duration = Duration::from_millis(50);

pub fn event(aggregate_uuid: Uuid, action: Action) -> NewEvent {
    NewEvent::new(aggregate_uuid, "Order", action, br#"{"total":1}"#.to_vec())
}

pub async fn committed(manager: &TransactionManager, aggregate_uuid: Uuid) -> Vec<EventEntry> {
    manager
        .events()
        .select_all(
            EventFilter::new()
                .aggregate(aggregate_uuid)
                .transaction(TransactionPredicate::committed()),
        )
        .await
        .unwrap()
}

/// T1 stages a CREATE, reserves and commits; the main line gains exactly
/// one entry.
pub async fn single_transaction_commit(manager: &TransactionManager) {
    // Arrange
    let agg = Uuid::new_v4();
    let before = manager.events().offset().await.unwrap();
    let t1 = manager.begin(true).await.unwrap();
    let staged = manager
        .stage(Some(t1.uuid), event(agg, Action::Create))
        .await
        .unwrap();
    assert_eq!(staged.version, 1);

    // Act
    let reserved = manager.reserve(t1.uuid).await.unwrap();
    let offset_before_commit = manager.events().offset().await.unwrap();
    let finished = manager.commit(t1.uuid).await.unwrap();

    // Assert
    assert_eq!(reserved.status, TransactionStatus::Reserved);
    assert_eq!(finished.status, TransactionStatus::Committed);
    assert_eq!(offset_before_commit, before + 1);
    assert_eq!(
        manager.events().offset().await.unwrap(),
        offset_before_commit + 1
    );
    let main = committed(manager, agg).await;
    assert_eq!(main.len(), 1);
    assert_eq!(main[0].version, 1);
    assert_eq!(main[0].transaction_uuid, None);
    assert_eq!(main[0].action, Action::Create);
}

/// T1 and T2 both stage version 2 on top of a shared CREATE; T1 commits
/// first and T2's reservation loses.
pub async fn second_reservation_loses(manager: &TransactionManager) {
    // Arrange
    let agg = Uuid::new_v4();
    manager.stage(None, event(agg, Action::Create)).await.unwrap();
    let t1 = manager.begin(true).await.unwrap();
    let t2 = manager.begin(true).await.unwrap();
    let s1 = manager
        .stage(Some(t1.uuid), event(agg, Action::Update))
        .await
        .unwrap();
    let s2 = manager
        .stage(Some(t2.uuid), event(agg, Action::Update))
        .await
        .unwrap();
    assert_eq!((s1.version, s2.version), (2, 2));

    // Act
    manager.reserve(t1.uuid).await.unwrap();
    manager.commit(t1.uuid).await.unwrap();
    let result = manager.reserve(t2.uuid).await;

    // Assert
    assert!(
        matches!(result, Err(StoreError::RepositoryConflict { transaction_uuid, .. }) if transaction_uuid == t2.uuid)
    );
    assert_eq!(
        manager.get(t2.uuid).await.unwrap().status,
        TransactionStatus::Rejected
    );
    let versions: Vec<i64> = committed(manager, agg)
        .await
        .iter()
        .map(|entry| entry.version)
        .collect();
    assert_eq!(versions, vec![1, 2]);
}

/// A commit copies exactly the staged entries, at their staged versions,
/// across several aggregates.
pub async fn commit_preserves_staged_versions(manager: &TransactionManager) {
    // Arrange
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    manager.stage(None, event(a, Action::Create)).await.unwrap();
    let tx = manager.begin(true).await.unwrap();
    let mut staged = Vec::new();
    for new in [
        event(a, Action::Update),
        event(b, Action::Create),
        event(a, Action::Update),
        event(b, Action::Delete),
    ] {
        staged.push(manager.stage(Some(tx.uuid), new).await.unwrap());
    }
    manager.reserve(tx.uuid).await.unwrap();

    // Act
    manager.commit(tx.uuid).await.unwrap();

    // Assert
    for agg in [a, b] {
        let expected: Vec<(i64, Action, Vec<u8>)> = staged
            .iter()
            .filter(|entry| entry.aggregate_uuid == agg)
            .map(|entry| (entry.version, entry.action, entry.data.clone()))
            .collect();
        let actual: Vec<(i64, Action, Vec<u8>)> = committed(manager, agg)
            .await
            .into_iter()
            .filter(|entry| agg == b || entry.version > 1)
            .map(|entry| (entry.version, entry.action, entry.data))
            .collect();
        assert_eq!(actual, expected);
    }
}

/// A main-line write that lands between reserve and commit makes the commit
/// lose; nothing of the losing transaction reaches the main line.
pub async fn commit_race_is_atomic(manager: &TransactionManager) {
    // Arrange
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    manager.stage(None, event(a, Action::Create)).await.unwrap();
    let tx = manager.begin(true).await.unwrap();
    manager.stage(Some(tx.uuid), event(b, Action::Create)).await.unwrap();
    manager.stage(Some(tx.uuid), event(a, Action::Update)).await.unwrap();
    manager.reserve(tx.uuid).await.unwrap();
    manager.stage(None, event(a, Action::Update)).await.unwrap();

    // Act
    let result = manager.commit(tx.uuid).await;

    // Assert
    assert!(result.unwrap_err().is_conflict());
    assert!(committed(manager, b).await.is_empty());
    assert_eq!(committed(manager, a).await.len(), 2);
    assert_eq!(
        manager.get(tx.uuid).await.unwrap().status,
        TransactionStatus::Rejected
    );
}

/// Concurrent writers retrying on conflict never leave a gap or a duplicate
/// in the committed history.
pub async fn concurrent_writers_keep_versions_contiguous(manager: Arc<TransactionManager>) {
    // Arrange
    let agg = Uuid::new_v4();
    manager.stage(None, event(agg, Action::Create)).await.unwrap();
    let writers = 8;

    // Act
    let handles: Vec<_> = (0..writers)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                loop {
                    let attempt = manager
                        .scoped(true, |tx| {
                            let manager = &manager;
                            async move {
                                manager.stage(Some(tx), event(agg, Action::Update)).await
                            }
                        })
                        .await;
                    match attempt {
                        Ok(entry) => return entry.version,
                        Err(err) if err.is_conflict() => {}
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    // Assert
    let versions: Vec<i64> = committed(&manager, agg)
        .await
        .iter()
        .map(|entry| entry.version)
        .collect();
    let expected: Vec<i64> = (1..=writers + 1).collect();
    assert_eq!(versions, expected);
}

/// A reject issued while a commit is publishing waits for the commit and
/// then finds the transaction already committed. The terminal status never
/// changes afterwards.
///
/// `manager` must sit on a log that delays commit batches by [`LOG_DELAY`].
pub async fn reject_during_commit_is_refused(manager: Arc<TransactionManager>) {
    // Arrange
    let agg = Uuid::new_v4();
    let tx = manager.begin(true).await.unwrap();
    manager
        .stage(Some(tx.uuid), event(agg, Action::Create))
        .await
        .unwrap();
    manager.reserve(tx.uuid).await.unwrap();

    // Act
    let committing = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.commit(tx.uuid).await })
    };
    tokio::time::sleep(INTERLEAVE_AFTER).await;
    let rejected = manager.reject(tx.uuid).await;
    let finished = committing.await.unwrap();

    // Assert
    assert_eq!(finished.unwrap().status, TransactionStatus::Committed);
    assert!(
        matches!(
            rejected,
            Err(StoreError::InvalidTransactionStatus {
                status: TransactionStatus::Committed,
                ..
            })
        ),
        "reject during commit returned {rejected:?}"
    );
    assert_eq!(
        manager.get(tx.uuid).await.unwrap().status,
        TransactionStatus::Committed
    );
    assert_eq!(committed(&manager, agg).await.len(), 1);
}

/// An entry staged while the transaction is being reserved is either
/// refused or validated; a reserved transaction never holds a claim the
/// validator did not see.
///
/// `manager` must sit on a log that delays offset reads by [`LOG_DELAY`].
pub async fn stage_during_reserve_is_validated_or_refused(manager: Arc<TransactionManager>) {
    // Arrange
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let rival = manager.begin(true).await.unwrap();
    manager
        .stage(Some(rival.uuid), event(b, Action::Create))
        .await
        .unwrap();
    manager.reserve(rival.uuid).await.unwrap();
    let tx = manager.begin(true).await.unwrap();
    manager
        .stage(Some(tx.uuid), event(a, Action::Create))
        .await
        .unwrap();

    // Act
    let reserving = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.reserve(tx.uuid).await })
    };
    tokio::time::sleep(INTERLEAVE_AFTER).await;
    let late = manager
        .stage(Some(tx.uuid), event(b, Action::Create))
        .await;
    let reserved = reserving.await.unwrap();

    // Assert
    match (&reserved, &late) {
        (Ok(entry), Err(StoreError::InvalidTransactionStatus { .. })) => {
            assert_eq!(entry.status, TransactionStatus::Reserved);
        }
        (Err(err), Ok(_)) => assert!(err.is_conflict(), "unexpected error: {err}"),
        _ => panic!("reserve returned {reserved:?}, late stage returned {late:?}"),
    }
    let tx_claims_b = !manager
        .events()
        .select_all(
            EventFilter::new()
                .aggregate(b)
                .transaction(TransactionPredicate::Eq(tx.uuid)),
        )
        .await
        .unwrap()
        .is_empty();
    let tx_status = manager.get(tx.uuid).await.unwrap().status;
    assert!(!(tx_claims_b && tx_status == TransactionStatus::Reserved));
    assert_eq!(
        manager.get(rival.uuid).await.unwrap().status,
        TransactionStatus::Reserved
    );
}
