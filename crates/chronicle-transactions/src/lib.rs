//! Chronicle Transactions — the reservation/commit protocol.
//!
//! A transaction stages events under its own uuid, invisible to everybody
//! else. `reserve` validates that no concurrent, still-live transaction and no
//! main-line writer has claimed the same `(aggregate_uuid, version)` pairs;
//! `commit` copies the staged entries to the main line. Neither step blocks
//! other transactions from starting: conflicts are detected, not prevented.

pub mod application;
pub mod domain;

pub use application::manager::TransactionManager;
pub use domain::conflict::Conflict;
