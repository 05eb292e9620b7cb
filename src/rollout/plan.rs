// Batch planning for staged replica replacement.

use serde::Serialize;

use crate::model::ServiceRecord;
use crate::orchestrator::ReplicaId;

/// Ordered batches of replica ids to replace, oldest replicas first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolloutPlan {
    pub service: String,
    pub to_version: String,
    pub batches: Vec<Vec<ReplicaId>>,
}

impl RolloutPlan {
    /// Plans the replacement of every replica of `record` not already running
    /// `to_version`. A `batch_size` of zero is treated as one.
    pub fn new(record: &ServiceRecord, to_version: &str, batch_size: usize) -> Self {
        let mut outdated: Vec<_> = record
            .replicas
            .iter()
            .filter(|r| r.version != to_version)
            .collect();
        outdated.sort_by_key(|r| r.seq);

        let batches = outdated
            .chunks(batch_size.max(1))
            .map(|chunk| chunk.iter().map(|r| r.id.clone()).collect())
            .collect();

        Self {
            service: record.name.clone(),
            to_version: to_version.to_string(),
            batches,
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Number of replicas the plan replaces.
    pub fn replicas(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}
