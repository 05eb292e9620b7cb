//! Scheduled database backups.

pub mod scheduler;
pub mod store;

#[cfg(test)]
mod store_test;

pub use scheduler::BackupScheduler;
pub use store::{BackupStore, FileBackupStore, MemoryBackupStore, StoreError};
