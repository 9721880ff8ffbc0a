//! Chronicle operator command line.
//!
//! Reads configuration from the environment, wires the PostgreSQL backends
//! into a transaction manager and a snapshot materializer, and prints
//! inspection results as JSON lines.

pub mod commands;
pub mod config;
pub mod error;
pub mod state;
