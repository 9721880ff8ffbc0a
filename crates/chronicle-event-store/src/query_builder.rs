//! Compiles `EventFilter` and `TransactionFilter` into PostgreSQL queries.

use chronicle_core::query::{Bounds, EventFilter, Order, TransactionPredicate};
use chronicle_core::transaction::TransactionFilter;
use sqlx::{Postgres, QueryBuilder};

use crate::schema::{EVENT_COLUMNS, EVENT_LOG_TABLE, TRANSACTION_COLUMNS, TRANSACTION_TABLE};

fn push_bounds(builder: &mut QueryBuilder<'static, Postgres>, column: &str, bounds: &Bounds) {
    let predicates = [
        ("=", bounds.eq),
        ("<", bounds.lt),
        (">", bounds.gt),
        ("<=", bounds.le),
        (">=", bounds.ge),
    ];
    for (operator, value) in predicates {
        if let Some(value) = value {
            builder
                .push(format!(" AND {column} {operator} "))
                .push_bind(value);
        }
    }
}

fn push_transaction(builder: &mut QueryBuilder<'static, Postgres>, predicate: &TransactionPredicate) {
    match predicate {
        TransactionPredicate::Any => {}
        TransactionPredicate::Eq(uuid) => {
            builder.push(" AND transaction_uuid = ").push_bind(*uuid);
        }
        TransactionPredicate::Ne(uuid) => {
            builder
                .push(" AND transaction_uuid IS DISTINCT FROM ")
                .push_bind(*uuid);
        }
        TransactionPredicate::In { uuids, committed } => {
            match (uuids.is_empty(), *committed) {
                (true, true) => {
                    builder.push(" AND transaction_uuid IS NULL");
                }
                (true, false) => {
                    builder.push(" AND FALSE");
                }
                (false, true) => {
                    builder
                        .push(" AND (transaction_uuid IS NULL OR transaction_uuid = ANY(")
                        .push_bind(uuids.clone())
                        .push("))");
                }
                (false, false) => {
                    builder
                        .push(" AND transaction_uuid = ANY(")
                        .push_bind(uuids.clone())
                        .push(")");
                }
            }
        }
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Builds the `SELECT` for an event filter, including ordering and
/// pagination.
pub(crate) fn select_events(filter: &EventFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder =
        QueryBuilder::new(format!("SELECT {EVENT_COLUMNS} FROM {EVENT_LOG_TABLE} WHERE TRUE"));

    if let Some(aggregate_uuid) = filter.aggregate_uuid {
        builder.push(" AND aggregate_uuid = ").push_bind(aggregate_uuid);
    }
    if let Some(name) = &filter.aggregate_name {
        builder.push(" AND aggregate_name = ").push_bind(name.clone());
    }
    push_bounds(&mut builder, "version", &filter.version);
    push_bounds(&mut builder, "id", &filter.id);
    push_transaction(&mut builder, &filter.transaction);

    builder.push(match filter.order {
        Order::Ascending => " ORDER BY id ASC",
        Order::Descending => " ORDER BY id DESC",
    });
    if let Some(limit) = filter.limit {
        builder.push(" LIMIT ").push_bind(to_i64(limit));
    }
    if filter.skip > 0 {
        builder.push(" OFFSET ").push_bind(to_i64(filter.skip));
    }
    builder
}

/// Builds the `SELECT` for a transaction filter.
pub(crate) fn select_transactions(filter: &TransactionFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "SELECT {TRANSACTION_COLUMNS} FROM {TRANSACTION_TABLE} WHERE TRUE"
    ));

    if let Some(uuids) = &filter.uuid_in {
        builder.push(" AND uuid = ANY(").push_bind(uuids.clone()).push(")");
    }
    if let Some(statuses) = &filter.status_in {
        let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_owned()).collect();
        builder.push(" AND status = ANY(").push_bind(names).push(")");
    }
    builder.push(" ORDER BY created_at ASC, uuid ASC");
    builder
}
