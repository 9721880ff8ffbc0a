//! Recording `TransactionListener` for tests.

use std::sync::Mutex;

use chronicle_core::repository::TransactionListener;
use chronicle_core::transaction::{TransactionEntry, TransactionStatus};
use uuid::Uuid;

/// A listener that records every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    finished: Mutex<Vec<(Uuid, TransactionStatus, Vec<Uuid>)>>,
}

impl RecordingListener {
    /// Creates a listener with no recorded notifications.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(transaction_uuid, status, aggregates)` for every
    /// notification, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn finished(&self) -> Vec<(Uuid, TransactionStatus, Vec<Uuid>)> {
        self.finished.lock().unwrap().clone()
    }
}

impl TransactionListener for RecordingListener {
    fn on_finished(&self, entry: &TransactionEntry, aggregates: &[Uuid]) {
        self.finished
            .lock()
            .unwrap()
            .push((entry.uuid, entry.status, aggregates.to_vec()));
    }
}
