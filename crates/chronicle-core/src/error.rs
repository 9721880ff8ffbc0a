//! Store error taxonomy.

use thiserror::Error;
use uuid::Uuid;

use crate::transaction::TransactionStatus;

/// Top-level error type shared by every chronicle component.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A committed entry was appended with a version that does not extend
    /// the aggregate's committed history by exactly one. Indicates a logic
    /// bug in the caller and is never retried.
    #[error(
        "version conflict on aggregate {aggregate_uuid}: expected version {expected}, got {actual}"
    )]
    VersionConflict {
        /// The aggregate whose history would have been broken.
        aggregate_uuid: Uuid,
        /// The only version that could have been appended.
        expected: i64,
        /// The version the caller supplied.
        actual: i64,
    },

    /// A reservation or commit lost an optimistic-concurrency race.
    #[error("repository conflict in transaction {transaction_uuid}: {reason}")]
    RepositoryConflict {
        /// The transaction that lost.
        transaction_uuid: Uuid,
        /// Human-readable description of the competing claim.
        reason: String,
    },

    /// A protocol operation was invoked against an incompatible status.
    #[error("transaction {transaction_uuid} cannot {operation} while {status}")]
    InvalidTransactionStatus {
        /// The transaction the operation targeted.
        transaction_uuid: Uuid,
        /// The status it was in.
        status: TransactionStatus,
        /// The rejected operation.
        operation: &'static str,
    },

    /// A transaction scope was opened while another one is active.
    #[error("already in transaction {0}")]
    AlreadyInTransaction(Uuid),

    /// No transaction row exists for the given uuid.
    #[error("transaction not found: {0}")]
    TransactionNotFound(Uuid),

    /// No visible event exists for the aggregate.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// The last visible event for the aggregate is a deletion.
    #[error("aggregate deleted: {0}")]
    DeletedAggregate(Uuid),

    /// A stored value or payload could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A storage/persistence error, propagated as-is.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl StoreError {
    /// Returns `true` for outcomes a caller may recover from by retrying the
    /// whole unit of work in a fresh transaction.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::RepositoryConflict { .. })
    }

    /// A status write found the row already moved to `status` by another
    /// writer.
    #[must_use]
    pub fn stale_status(transaction_uuid: Uuid, status: TransactionStatus) -> Self {
        Self::InvalidTransactionStatus {
            transaction_uuid,
            status,
            operation: "transition",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_repository_conflict_is_retryable() {
        let id = Uuid::new_v4();
        assert!(
            StoreError::RepositoryConflict {
                transaction_uuid: id,
                reason: "claimed".into(),
            }
            .is_conflict()
        );
        assert!(
            !StoreError::VersionConflict {
                aggregate_uuid: id,
                expected: 2,
                actual: 3,
            }
            .is_conflict()
        );
        assert!(!StoreError::AggregateNotFound(id).is_conflict());
    }

    #[test]
    fn test_invalid_status_message_names_operation_and_status() {
        let id = Uuid::new_v4();
        let err = StoreError::InvalidTransactionStatus {
            transaction_uuid: id,
            status: TransactionStatus::Committed,
            operation: "reserve",
        };

        assert_eq!(
            err.to_string(),
            format!("transaction {id} cannot reserve while committed")
        );
    }
}
