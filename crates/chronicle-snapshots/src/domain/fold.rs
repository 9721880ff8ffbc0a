//! Folding an aggregate's visible history into a snapshot.

use std::collections::BTreeMap;

use chronicle_core::error::StoreError;
use chronicle_core::event::{Action, EventEntry};
use chronicle_core::snapshot::SnapshotEntry;
use uuid::Uuid;

use super::reducer::StateReducer;

/// Orders the entries visible to `transaction_uuid` by version.
///
/// Main-line entries are always visible; staged entries only to their own
/// transaction. When an own staged entry and a main-line entry share a
/// version, the staged one wins.
#[must_use]
pub fn visible_history(entries: Vec<EventEntry>, transaction_uuid: Option<Uuid>) -> Vec<EventEntry> {
    let mut by_version: BTreeMap<i64, EventEntry> = BTreeMap::new();
    for entry in entries {
        match entry.transaction_uuid {
            None => {
                by_version.entry(entry.version).or_insert(entry);
            }
            Some(owner) if Some(owner) == transaction_uuid => {
                by_version.insert(entry.version, entry);
            }
            Some(_) => {}
        }
    }
    by_version.into_values().collect()
}

/// Applies `history` on top of `base`.
///
/// Entries at or below the base version are skipped. A `Create` starts a new
/// lineage even after a `Delete`; an `Update` needs live state to apply to.
/// Returns `None` when there was neither a base nor any entry.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if a payload cannot be reduced or an
/// update has no live state underneath it.
pub fn fold(
    reducer: &dyn StateReducer,
    base: Option<SnapshotEntry>,
    history: &[EventEntry],
    transaction_uuid: Option<Uuid>,
) -> Result<Option<SnapshotEntry>, StoreError> {
    let floor = base.as_ref().map_or(0, |snapshot| snapshot.version);
    let mut current = base;

    for entry in history.iter().filter(|entry| entry.version > floor) {
        let previous = current.take();
        let data = match entry.action {
            Action::Create => Some(reducer.create(&entry.data)?),
            Action::Update => {
                let state = previous
                    .as_ref()
                    .and_then(|snapshot| snapshot.data.as_deref())
                    .ok_or_else(|| {
                        StoreError::Serialization(format!(
                            "update at version {} of aggregate {} has no live state",
                            entry.version, entry.aggregate_uuid
                        ))
                    })?;
                Some(reducer.update(state, &entry.data)?)
            }
            Action::Delete => None,
        };
        let created_at = match (&previous, entry.action) {
            (Some(snapshot), Action::Update | Action::Delete) => snapshot.created_at,
            _ => entry.created_at,
        };

        current = Some(SnapshotEntry {
            aggregate_uuid: entry.aggregate_uuid,
            aggregate_name: entry.aggregate_name.clone(),
            version: entry.version,
            schema: reducer.schema(&entry.aggregate_name),
            data,
            created_at,
            updated_at: entry.created_at,
            transaction_uuid,
        });
    }

    Ok(current)
}
