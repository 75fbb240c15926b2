//! Periodic maintenance for the task engine.
//!
//! Runs the online-player expiry sweep, the template catalog delta sync and
//! the data-retention cleanup on their configured intervals.

pub mod jobs;
pub mod runner;

pub use jobs::{JobKind, JobResult, MaintenanceJob};
pub use runner::{JobRunRecord, MaintenanceRunner};
