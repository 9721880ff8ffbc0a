//! Conflict detection — pure rules, no I/O.
//!
//! A transaction claims every `(aggregate_uuid, version)` pair it staged.
//! The claim is lost if the main line already holds that version, or if
//! another transaction staged the same pair and has since reached a
//! claiming status (`Reserving`, `Reserved`, `Committing`, `Committed`).
//! Pending and rejected competitors never block.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chronicle_core::event::EventEntry;
use chronicle_core::transaction::TransactionStatus;
use uuid::Uuid;

/// The first competing claim found against a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// The main line already holds this version.
    Committed {
        /// Contested aggregate.
        aggregate_uuid: Uuid,
        /// Contested version.
        version: i64,
    },
    /// Another live transaction holds a claim on this version.
    Claimed {
        /// Contested aggregate.
        aggregate_uuid: Uuid,
        /// Contested version.
        version: i64,
        /// The competing transaction.
        transaction_uuid: Uuid,
        /// Its status at validation time.
        status: TransactionStatus,
    },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed {
                aggregate_uuid,
                version,
            } => write!(
                f,
                "version {version} of aggregate {aggregate_uuid} is already committed"
            ),
            Self::Claimed {
                aggregate_uuid,
                version,
                transaction_uuid,
                status,
            } => write!(
                f,
                "version {version} of aggregate {aggregate_uuid} is claimed by transaction \
                 {transaction_uuid} ({status})"
            ),
        }
    }
}

/// The distinct `(aggregate_uuid, version)` pairs staged by `transaction_uuid`,
/// in ascending order.
#[must_use]
pub fn claims(transaction_uuid: Uuid, staged: &[EventEntry]) -> BTreeSet<(Uuid, i64)> {
    staged
        .iter()
        .filter(|entry| entry.transaction_uuid == Some(transaction_uuid))
        .map(|entry| (entry.aggregate_uuid, entry.version))
        .collect()
}

/// Checks `competing` entries against the claims in `staged`.
///
/// `statuses` maps competing transaction uuids to their current status;
/// a competitor missing from the map has no transaction row and is ignored.
/// Entries are inspected in log order so the reported conflict is the
/// earliest one.
#[must_use]
pub fn find_conflict(
    transaction_uuid: Uuid,
    staged: &[EventEntry],
    competing: &[EventEntry],
    statuses: &HashMap<Uuid, TransactionStatus>,
) -> Option<Conflict> {
    let claimed = claims(transaction_uuid, staged);

    let mut ordered: Vec<&EventEntry> = competing
        .iter()
        .filter(|entry| entry.transaction_uuid != Some(transaction_uuid))
        .filter(|entry| claimed.contains(&(entry.aggregate_uuid, entry.version)))
        .collect();
    ordered.sort_by_key(|entry| entry.id);

    ordered.into_iter().find_map(|entry| match entry.transaction_uuid {
        None => Some(Conflict::Committed {
            aggregate_uuid: entry.aggregate_uuid,
            version: entry.version,
        }),
        Some(other) => statuses
            .get(&other)
            .filter(|status| status.is_claiming())
            .map(|status| Conflict::Claimed {
                aggregate_uuid: entry.aggregate_uuid,
                version: entry.version,
                transaction_uuid: other,
                status: *status,
            }),
    })
}
