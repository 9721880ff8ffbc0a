//! Chronicle Snapshots — current aggregate state, folded from the log.
//!
//! The materializer answers "what does aggregate X look like" for the main
//! line or for one transaction's view of it. Snapshots are disposable: a
//! concurrent cache and an optional persisted table only shorten the replay.

pub mod application;
pub mod domain;

pub use application::cache::SnapshotCache;
pub use application::materializer::{SnapshotMaterializer, SyncReport};
pub use domain::reducer::{JsonMergeReducer, StateReducer};
