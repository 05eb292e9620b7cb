//! In-memory orchestrator.
//!
//! Simulates replicas and jobs without touching a container runtime. Used by
//! the `memory` orchestrator kind (local runs, demos) and as the fake
//! infrastructure in tests, where its knobs inject unready versions, failing
//! calls and slow jobs.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::api::{
    JobHandle, JobSpec, JobState, Orchestrator, OrchestratorError, ReplicaId, ReplicaStatus,
};

const DEFAULT_JOB_DURATION: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
enum Readiness {
    Never,
    First(usize),
}

#[derive(Debug, Clone)]
struct SimReplica {
    id: ReplicaId,
    version: String,
    ready: bool,
}

#[derive(Debug, Default)]
struct SimService {
    image_version: String,
    replicas: Vec<SimReplica>,
    min_ready: Option<usize>,
}

#[derive(Debug)]
struct SimJob {
    target: String,
    finishes_at: Instant,
    failure: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    services: HashMap<String, SimService>,
    readiness: HashMap<(String, String), Readiness>,
    started: HashMap<(String, String), usize>,
    broken: HashSet<String>,
    stalled: HashMap<String, Duration>,
    failing: HashSet<(String, &'static str)>,
    jobs: HashMap<String, SimJob>,
    job_duration: Duration,
    job_failure: Option<String>,
    calls: Vec<String>,
}

impl Inner {
    fn check(&self, service: &str, operation: &'static str) -> Result<(), OrchestratorError> {
        if self.failing.contains(&(service.to_string(), operation)) {
            return Err(OrchestratorError::new(
                operation,
                service,
                "injected failure",
            ));
        }
        Ok(())
    }

    fn spawn_replica(&mut self, service: &str, version: &str) -> ReplicaId {
        self.next_id += 1;
        let id = format!("{service}-{}", self.next_id);

        let key = (service.to_string(), version.to_string());
        let started = self.started.entry(key.clone()).or_insert(0);
        let ready = if self.broken.contains(service) {
            false
        } else {
            match self.readiness.get(&key) {
                Some(Readiness::Never) => false,
                Some(Readiness::First(n)) => *started < *n,
                None => true,
            }
        };
        *started += 1;

        let svc = self.services.entry(service.to_string()).or_default();
        svc.replicas.push(SimReplica {
            id: id.clone(),
            version: version.to_string(),
            ready,
        });
        id
    }

    fn observe(&mut self, service: &str) {
        if let Some(svc) = self.services.get_mut(service) {
            if let Some(min) = svc.min_ready {
                let ready = svc.replicas.iter().filter(|r| r.ready).count();
                svc.min_ready = Some(min.min(ready));
            }
        }
    }
}

/// Orchestrator that keeps all replicas and jobs in process memory.
#[derive(Debug)]
pub struct MemoryOrchestrator {
    inner: Mutex<Inner>,
}

impl Default for MemoryOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOrchestrator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                job_duration: DEFAULT_JOB_DURATION,
                ..Inner::default()
            }),
        }
    }

    /// Replicas of `service` never report ready, whatever their version.
    pub fn never_ready(&self, service: &str) {
        self.inner.lock().broken.insert(service.to_string());
    }

    /// Replicas of `service` started at `version` never report ready.
    pub fn never_ready_version(&self, service: &str, version: &str) {
        self.inner
            .lock()
            .readiness
            .insert((service.to_string(), version.to_string()), Readiness::Never);
    }

    /// Only the first `n` replicas of `service` started at `version` become ready.
    pub fn ready_only_first(&self, service: &str, version: &str, n: usize) {
        self.inner
            .lock()
            .readiness
            .insert((service.to_string(), version.to_string()), Readiness::First(n));
    }

    /// Flips raw readiness of one replica.
    pub fn set_ready(&self, service: &str, id: &str, ready: bool) {
        let mut inner = self.inner.lock();
        if let Some(svc) = inner.services.get_mut(service) {
            if let Some(replica) = svc.replicas.iter_mut().find(|r| r.id == id) {
                replica.ready = ready;
            }
        }
        inner.observe(service);
    }

    /// Status calls for `service` take `delay` before answering (`None` = answer at once).
    pub fn stall_status(&self, service: &str, delay: Option<Duration>) {
        let mut inner = self.inner.lock();
        match delay {
            Some(delay) => inner.stalled.insert(service.to_string(), delay),
            None => inner.stalled.remove(service),
        };
    }

    /// Jobs triggered and not yet finished or cancelled.
    pub fn open_jobs(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    /// Makes `operation` on `service` fail until cleared.
    pub fn fail_operation(&self, service: &str, operation: &'static str) {
        self.inner
            .lock()
            .failing
            .insert((service.to_string(), operation));
    }

    pub fn clear_failures(&self) {
        self.inner.lock().failing.clear();
    }

    /// Runtime of jobs triggered from now on.
    pub fn set_job_duration(&self, duration: Duration) {
        self.inner.lock().job_duration = duration;
    }

    /// Jobs triggered from now on finish with this error (`None` = succeed).
    pub fn set_job_failure(&self, failure: Option<&str>) {
        self.inner.lock().job_failure = failure.map(str::to_string);
    }

    /// Starts recording the minimum raw ready count of `service`.
    pub fn track_min_ready(&self, service: &str) {
        let mut inner = self.inner.lock();
        let svc = inner.services.entry(service.to_string()).or_default();
        let ready = svc.replicas.iter().filter(|r| r.ready).count();
        svc.min_ready = Some(ready);
    }

    pub fn min_ready(&self, service: &str) -> Option<usize> {
        self.inner
            .lock()
            .services
            .get(service)
            .and_then(|svc| svc.min_ready)
    }

    /// Mutating calls received so far, e.g. `"set_replicas db 1"`.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    /// Mutating calls that targeted `service`.
    pub fn calls_for(&self, service: &str) -> Vec<String> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.split_whitespace().nth(1) == Some(service))
            .cloned()
            .collect()
    }

    pub fn replicas(&self, service: &str) -> Vec<ReplicaStatus> {
        self.inner
            .lock()
            .services
            .get(service)
            .map(|svc| {
                svc.replicas
                    .iter()
                    .map(|r| ReplicaStatus {
                        id: r.id.clone(),
                        version: r.version.clone(),
                        ready: r.ready,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Orchestrator for MemoryOrchestrator {
    async fn set_replicas(&self, service: &str, count: usize) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock();
        inner.check(service, "set_replicas")?;
        inner.calls.push(format!("set_replicas {service} {count}"));

        let version = inner
            .services
            .entry(service.to_string())
            .or_default()
            .image_version
            .clone();
        let current = inner.services.get(service).map(|s| s.replicas.len()).unwrap_or(0);

        if count > current {
            for _ in current..count {
                inner.spawn_replica(service, &version);
            }
        } else if let Some(svc) = inner.services.get_mut(service) {
            svc.replicas.truncate(count);
        }
        inner.observe(service);
        Ok(())
    }

    async fn set_image_version(&self, service: &str, version: &str) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock();
        inner.check(service, "set_image_version")?;
        inner.calls.push(format!("set_image_version {service} {version}"));
        inner
            .services
            .entry(service.to_string())
            .or_default()
            .image_version = version.to_string();
        Ok(())
    }

    async fn get_replica_status(&self, service: &str) -> Result<Vec<ReplicaStatus>, OrchestratorError> {
        let stall = {
            let inner = self.inner.lock();
            inner.check(service, "get_replica_status")?;
            inner.stalled.get(service).copied()
        };
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        Ok(self.replicas(service))
    }

    async fn start_replica(&self, service: &str, version: &str) -> Result<ReplicaId, OrchestratorError> {
        let mut inner = self.inner.lock();
        inner.check(service, "start_replica")?;
        inner.calls.push(format!("start_replica {service} {version}"));
        let id = inner.spawn_replica(service, version);
        inner.observe(service);
        debug!(component = "orchestrator", service = service, replica = %id, version = version, "replica started");
        Ok(id)
    }

    async fn stop_replica(&self, service: &str, id: &str) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock();
        inner.check(service, "stop_replica")?;
        inner.calls.push(format!("stop_replica {service} {id}"));
        let svc = inner
            .services
            .get_mut(service)
            .ok_or_else(|| OrchestratorError::new("stop_replica", service, "no such service"))?;
        let before = svc.replicas.len();
        svc.replicas.retain(|r| r.id != id);
        if svc.replicas.len() == before {
            return Err(OrchestratorError::new(
                "stop_replica",
                service,
                format!("no such replica {id}"),
            ));
        }
        inner.observe(service);
        Ok(())
    }

    async fn trigger_job(&self, spec: &JobSpec) -> Result<JobHandle, OrchestratorError> {
        let mut inner = self.inner.lock();
        inner.check(&spec.target, "trigger_job")?;
        inner.calls.push(format!("trigger_job {} {}", spec.target, spec.name));
        inner.next_id += 1;
        let handle = format!("job-{}-{}", spec.name, inner.next_id);
        let job = SimJob {
            target: spec.target.clone(),
            finishes_at: Instant::now() + inner.job_duration,
            failure: inner.job_failure.clone(),
        };
        inner.jobs.insert(handle.clone(), job);
        Ok(JobHandle(handle))
    }

    async fn job_status(&self, handle: &JobHandle) -> Result<JobState, OrchestratorError> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get(&handle.0)
            .ok_or_else(|| OrchestratorError::new("job_status", handle.0.clone(), "no such job"))?;
        if Instant::now() < job.finishes_at {
            return Ok(JobState::Running);
        }
        let state = match &job.failure {
            Some(reason) => JobState::Failed(reason.clone()),
            None => JobState::Succeeded,
        };
        inner.jobs.remove(&handle.0);
        Ok(state)
    }

    async fn cancel_job(&self, handle: &JobHandle) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock();
        if let Some(job) = inner.jobs.remove(&handle.0) {
            inner.calls.push(format!("cancel_job {} {}", job.target, handle.0));
        }
        Ok(())
    }
}
