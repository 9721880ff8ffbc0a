//! Property-based tests for the transaction protocol
//!
//! Random interleavings of staging, reserving, committing, rejecting and
//! plain main-line appends over a handful of aggregates must keep:
//! - Contiguity: committed versions of every aggregate are exactly `1..N`
//! - Fidelity: a committed transaction's entries land at their staged versions

use std::collections::HashMap;
use std::sync::Arc;

use chronicle_core::error::StoreError;
use chronicle_core::event::{Action, NewEvent};
use chronicle_core::query::{EventFilter, TransactionPredicate};
use chronicle_core::repository::EventLog;
use chronicle_core::transaction::TransactionStatus;
use chronicle_event_store::{InMemoryEventLog, InMemoryTransactionRepository};
use chronicle_transactions::TransactionManager;
use proptest::prelude::*;
use uuid::Uuid;

const TRANSACTIONS: usize = 3;
const AGGREGATES: usize = 2;

#[derive(Debug, Clone)]
enum Step {
    Stage { tx: usize, aggregate: usize },
    MainLine { aggregate: usize },
    Reserve { tx: usize },
    Commit { tx: usize },
    Reject { tx: usize },
}

/// Strategy for generating one protocol step
fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0..TRANSACTIONS, 0..AGGREGATES)
            .prop_map(|(tx, aggregate)| Step::Stage { tx, aggregate }),
        2 => (0..AGGREGATES).prop_map(|aggregate| Step::MainLine { aggregate }),
        1 => (0..TRANSACTIONS).prop_map(|tx| Step::Reserve { tx }),
        2 => (0..TRANSACTIONS).prop_map(|tx| Step::Commit { tx }),
        1 => (0..TRANSACTIONS).prop_map(|tx| Step::Reject { tx }),
    ]
}

fn update(aggregate_uuid: Uuid) -> NewEvent {
    NewEvent::new(aggregate_uuid, "Counter", Action::Update, b"{}".to_vec())
}

/// Protocol outcomes that a well-behaved caller may observe.
fn is_expected(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::RepositoryConflict { .. } | StoreError::InvalidTransactionStatus { .. }
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: committed histories stay gap-free under any interleaving
    #[test]
    fn prop_committed_versions_are_contiguous(steps in prop::collection::vec(step_strategy(), 1..40)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let events = Arc::new(InMemoryEventLog::new());
            let manager = TransactionManager::new(
                events.clone(),
                Arc::new(InMemoryTransactionRepository::new()),
            );
            let aggregates: Vec<Uuid> = (0..AGGREGATES).map(|_| Uuid::new_v4()).collect();
            let mut transactions = Vec::new();
            for _ in 0..TRANSACTIONS {
                transactions.push(manager.begin(false).await.unwrap().uuid);
            }

            for step in steps {
                let result = match step {
                    Step::Stage { tx, aggregate } => manager
                        .stage(Some(transactions[tx]), update(aggregates[aggregate]))
                        .await
                        .map(|_| ()),
                    Step::MainLine { aggregate } => manager
                        .stage(None, update(aggregates[aggregate]))
                        .await
                        .map(|_| ()),
                    Step::Reserve { tx } => manager.reserve(transactions[tx]).await.map(|_| ()),
                    Step::Commit { tx } => manager.commit(transactions[tx]).await.map(|_| ()),
                    Step::Reject { tx } => manager.reject(transactions[tx]).await.map(|_| ()),
                };
                if let Err(err) = result {
                    prop_assert!(is_expected(&err), "unexpected error: {}", err);
                }
            }

            let mut main_line = HashMap::new();
            for aggregate_uuid in &aggregates {
                let entries = events
                    .select_all(
                        EventFilter::new()
                            .aggregate(*aggregate_uuid)
                            .transaction(TransactionPredicate::committed()),
                    )
                    .await
                    .unwrap();
                let versions: Vec<i64> = entries.iter().map(|e| e.version).collect();
                let expected: Vec<i64> = (1..=i64::try_from(versions.len()).unwrap()).collect();
                prop_assert_eq!(&versions, &expected);
                main_line.insert(*aggregate_uuid, entries);
            }

            for tx in &transactions {
                let status = manager.get(*tx).await.unwrap().status;
                let staged = events
                    .select_all(EventFilter::new().transaction(TransactionPredicate::Eq(*tx)))
                    .await
                    .unwrap();
                for entry in staged {
                    let published = main_line[&entry.aggregate_uuid]
                        .iter()
                        .any(|main| main.version == entry.version && main.id > entry.id);
                    match status {
                        TransactionStatus::Committed => prop_assert!(published),
                        TransactionStatus::Pending
                        | TransactionStatus::Reserved
                        | TransactionStatus::Rejected => {}
                        other => prop_assert!(false, "transaction left in {}", other),
                    }
                }
            }
            Ok(())
        })?;
    }
}
