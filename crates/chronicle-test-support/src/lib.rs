//! Shared test doubles and backend contract tests for chronicle.

pub mod contract;

mod clock;
mod listener;
mod repository;

pub use clock::{FixedClock, TickingClock};
pub use listener::RecordingListener;
pub use repository::{DelayedEventLog, FailingEventLog, FailingTransactionRepository};
