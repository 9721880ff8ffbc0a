//! Which protocol operations each transaction status admits.

use chronicle_core::error::StoreError;
use chronicle_core::transaction::{TransactionEntry, TransactionStatus};

/// A protocol operation that is gated on the transaction's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Append an entry under the transaction's uuid.
    Stage,
    /// Validate the staged claims.
    Reserve,
    /// Publish the staged entries to the main line.
    Commit,
    /// Abandon the transaction.
    Reject,
}

impl Operation {
    /// Verb used in error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stage => "stage",
            Self::Reserve => "reserve",
            Self::Commit => "commit",
            Self::Reject => "reject",
        }
    }

    /// Returns `true` if the operation may start from `status`.
    #[must_use]
    pub fn allowed_from(self, status: TransactionStatus) -> bool {
        match self {
            Self::Stage | Self::Reserve => status == TransactionStatus::Pending,
            Self::Commit => matches!(
                status,
                TransactionStatus::Pending | TransactionStatus::Reserved
            ),
            Self::Reject => !status.is_terminal(),
        }
    }
}

/// Fails with `InvalidTransactionStatus` unless `operation` may start from
/// the entry's current status.
///
/// # Errors
///
/// Returns `StoreError::InvalidTransactionStatus` when the transition is not
/// permitted.
pub fn ensure_allowed(entry: &TransactionEntry, operation: Operation) -> Result<(), StoreError> {
    if operation.allowed_from(entry.status) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransactionStatus {
            transaction_uuid: entry.uuid,
            status: entry.status,
            operation: operation.as_str(),
        })
    }
}
