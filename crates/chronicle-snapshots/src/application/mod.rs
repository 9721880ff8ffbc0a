//! Materialization over the event log and snapshot table.

pub mod cache;
pub mod materializer;
