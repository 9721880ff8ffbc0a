//! Chronicle Core — shared types and capability traits.
//!
//! This crate defines the entry records of the event log, the transaction
//! table and the snapshot table, the filters used to query them, and the
//! async traits every storage backend implements. It contains no
//! infrastructure code.

pub mod clock;
pub mod error;
pub mod event;
pub mod query;
pub mod repository;
pub mod snapshot;
pub mod transaction;
