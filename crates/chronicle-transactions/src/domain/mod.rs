//! Pure protocol rules: status transitions and conflict detection.

pub mod conflict;
pub mod transitions;
