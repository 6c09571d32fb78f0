//! Relational store for materialized entities

pub mod layout;
pub mod locations;
pub mod runs;
pub mod writer;

pub use layout::{EntityLayout, SqlValue};
pub use locations::write_locations;
pub use runs::{finish_run, record_failures, start_run, RunCounts, RunStatus};
pub use writer::{BatchWriter, FailureRecord, WriteStats, DEFAULT_BATCH_SIZE};
