//! Wired store components shared by every command.

use std::sync::Arc;

use chronicle_core::repository::{EventLog, SnapshotRepository, TransactionRepository};
use chronicle_event_store::{PgEventLog, PgSnapshotRepository, PgTransactionRepository};
use chronicle_snapshots::SnapshotMaterializer;
use chronicle_transactions::TransactionManager;
use sqlx::PgPool;

use crate::config::Config;

/// Store components a command runs against.
#[derive(Debug)]
pub struct AppState {
    /// PostgreSQL pool, absent when running against other backends.
    pub db_pool: Option<PgPool>,
    /// Transaction protocol entry point.
    pub manager: TransactionManager,
    /// Snapshot queries and synchronization.
    pub materializer: Arc<SnapshotMaterializer>,
}

impl AppState {
    /// Wires arbitrary backends together. The materializer is registered as
    /// a transaction listener so finished transactions evict its cache.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventLog>,
        transactions: Arc<dyn TransactionRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
        config: &Config,
    ) -> Self {
        let materializer = Arc::new(
            SnapshotMaterializer::new(Arc::clone(&events))
                .with_repository(snapshots)
                .with_cache(config.snapshot_cache),
        );
        let manager = TransactionManager::new(events, transactions)
            .with_lock_stripes(config.lock_stripes)
            .with_listener(materializer.clone());
        Self {
            db_pool: None,
            manager,
            materializer,
        }
    }

    /// Wires the PostgreSQL backends.
    #[must_use]
    pub fn postgres(db_pool: PgPool, config: &Config) -> Self {
        let state = Self::new(
            Arc::new(PgEventLog::new(db_pool.clone())),
            Arc::new(PgTransactionRepository::new(db_pool.clone())),
            Arc::new(PgSnapshotRepository::new(db_pool.clone())),
            config,
        );
        Self {
            db_pool: Some(db_pool),
            ..state
        }
    }
}
