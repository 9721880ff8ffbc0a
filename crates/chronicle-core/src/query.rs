//! Event log filters.
//!
//! An [`EventFilter`] is the single query language shared by every backend:
//! the in-memory log evaluates it with [`EventFilter::matches`], the
//! PostgreSQL log compiles it to SQL. Every invocation is an independent
//! read; no cursor state survives between calls.

use uuid::Uuid;

use crate::event::EventEntry;

/// Equality and range predicates over an integer column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    /// `column = eq`
    pub eq: Option<i64>,
    /// `column < lt`
    pub lt: Option<i64>,
    /// `column > gt`
    pub gt: Option<i64>,
    /// `column <= le`
    pub le: Option<i64>,
    /// `column >= ge`
    pub ge: Option<i64>,
}

impl Bounds {
    /// Returns `true` if `value` satisfies every predicate that is set.
    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        self.eq.is_none_or(|v| value == v)
            && self.lt.is_none_or(|v| value < v)
            && self.gt.is_none_or(|v| value > v)
            && self.le.is_none_or(|v| value <= v)
            && self.ge.is_none_or(|v| value >= v)
    }

    /// Returns `true` if no predicate is set.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        *self == Self::default()
    }
}

/// Predicate over the nullable `transaction_uuid` column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TransactionPredicate {
    /// No restriction.
    #[default]
    Any,
    /// `transaction_uuid = uuid`
    Eq(Uuid),
    /// `transaction_uuid IS DISTINCT FROM uuid`; committed entries match.
    Ne(Uuid),
    /// Membership in `uuids`, plus committed entries when `committed` is set.
    In {
        /// Staging transactions to include.
        uuids: Vec<Uuid>,
        /// Whether main-line entries are included.
        committed: bool,
    },
}

impl TransactionPredicate {
    /// Only main-line entries.
    #[must_use]
    pub fn committed() -> Self {
        Self::In {
            uuids: Vec::new(),
            committed: true,
        }
    }

    /// The visibility set of a transaction: the main line plus its own
    /// staged entries, or just the main line outside a transaction.
    #[must_use]
    pub fn visible_to(transaction_uuid: Option<Uuid>) -> Self {
        Self::In {
            uuids: transaction_uuid.into_iter().collect(),
            committed: true,
        }
    }

    /// Evaluates the predicate against a column value.
    #[must_use]
    pub fn matches(&self, value: Option<Uuid>) -> bool {
        match self {
            Self::Any => true,
            Self::Eq(uuid) => value == Some(*uuid),
            Self::Ne(uuid) => value != Some(*uuid),
            Self::In { uuids, committed } => match value {
                None => *committed,
                Some(uuid) => uuids.contains(&uuid),
            },
        }
    }
}

/// Result ordering by global id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    /// Oldest first.
    #[default]
    Ascending,
    /// Newest first.
    Descending,
}

/// Filter, ordering and pagination over the event log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Restrict to one aggregate.
    pub aggregate_uuid: Option<Uuid>,
    /// Restrict to one aggregate type.
    pub aggregate_name: Option<String>,
    /// Predicates over `version`.
    pub version: Bounds,
    /// Predicates over the global `id`.
    pub id: Bounds,
    /// Predicate over `transaction_uuid`.
    pub transaction: TransactionPredicate,
    /// Ordering by global id.
    pub order: Order,
    /// Number of matching entries to skip.
    pub skip: usize,
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
}

impl EventFilter {
    /// Matches every entry, oldest first.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one aggregate.
    #[must_use]
    pub fn aggregate(mut self, aggregate_uuid: Uuid) -> Self {
        self.aggregate_uuid = Some(aggregate_uuid);
        self
    }

    /// Restricts to one aggregate type.
    #[must_use]
    pub fn aggregate_name(mut self, name: impl Into<String>) -> Self {
        self.aggregate_name = Some(name.into());
        self
    }

    /// Restricts to an exact version.
    #[must_use]
    pub fn version(mut self, version: i64) -> Self {
        self.version.eq = Some(version);
        self
    }

    /// Restricts to versions strictly greater than `version`.
    #[must_use]
    pub fn version_gt(mut self, version: i64) -> Self {
        self.version.gt = Some(version);
        self
    }

    /// Restricts to versions lower than or equal to `version`.
    #[must_use]
    pub fn version_le(mut self, version: i64) -> Self {
        self.version.le = Some(version);
        self
    }

    /// Restricts to global ids strictly greater than `id`.
    #[must_use]
    pub fn id_gt(mut self, id: i64) -> Self {
        self.id.gt = Some(id);
        self
    }

    /// Restricts to global ids lower than or equal to `id`.
    #[must_use]
    pub fn id_le(mut self, id: i64) -> Self {
        self.id.le = Some(id);
        self
    }

    /// Sets the transaction predicate.
    #[must_use]
    pub fn transaction(mut self, predicate: TransactionPredicate) -> Self {
        self.transaction = predicate;
        self
    }

    /// Sets the ordering.
    #[must_use]
    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Skips the first `skip` matches.
    #[must_use]
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Returns at most `limit` matches.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluates the predicates (not ordering or pagination) against an entry.
    #[must_use]
    pub fn matches(&self, entry: &EventEntry) -> bool {
        self.aggregate_uuid.is_none_or(|u| u == entry.aggregate_uuid)
            && self
                .aggregate_name
                .as_deref()
                .is_none_or(|n| n == entry.aggregate_name)
            && self.version.contains(entry.version)
            && self.id.contains(entry.id)
            && self.transaction.matches(entry.transaction_uuid)
    }
}
