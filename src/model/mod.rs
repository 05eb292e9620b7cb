//! Shared data model: service records, replicas, lifecycle states and backup records.

pub mod backup;
pub mod service;

pub use backup::{BackupOutcome, BackupRecord};
pub use service::{HealthStatus, Replica, RolloutState, ServiceRecord, StartupPhase};
