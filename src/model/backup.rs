// Backup job outcome records, persisted through the backup store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupOutcome {
    Success,
    Failure,
    Pending,
}

impl BackupOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupOutcome::Success => "success",
            BackupOutcome::Failure => "failure",
            BackupOutcome::Pending => "pending",
        }
    }
}

/// Last-run bookkeeping for one backup job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub job: String,
    pub target: String,
    pub schedule: String,
    pub last_run: Option<DateTime<Utc>>,
    pub last_outcome: Option<BackupOutcome>,
    pub last_error: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub runs: u64,
    #[serde(default)]
    pub skipped: u64,
}

impl BackupRecord {
    pub fn new(job: String, target: String, schedule: String) -> Self {
        Self {
            job,
            target,
            schedule,
            last_run: None,
            last_outcome: None,
            last_error: None,
            next_run: None,
            runs: 0,
            skipped: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.last_outcome == Some(BackupOutcome::Pending)
    }
}
