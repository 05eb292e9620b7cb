//! Docker CLI orchestrator.
//!
//! Each replica is a labelled container (`<prefix>.service`, `<prefix>.version`).
//! Readiness comes from the container status line: a replica is ready when it
//! is up and its healthcheck (if any) is not starting or failing. Backup jobs
//! run as `docker exec` into a ready replica of the target service.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info};

use super::api::{
    JobHandle, JobSpec, JobState, Orchestrator, OrchestratorError, ReplicaId, ReplicaStatus,
};

const DEFAULT_COMMAND: &str = "docker";
const DEFAULT_LABEL_PREFIX: &str = "stackctl";
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Orchestrator backed by the `docker` command line.
pub struct DockerOrchestrator {
    command: String,
    label_prefix: String,
    network: Option<String>,
    call_timeout: Duration,
    images: HashMap<String, String>,
    versions: Mutex<HashMap<String, String>>,
    jobs: Mutex<HashMap<String, Child>>,
    next_job: AtomicU64,
}

impl DockerOrchestrator {
    /// `images` maps service name to image repository (without tag).
    pub fn new(
        command: Option<String>,
        label_prefix: Option<String>,
        network: Option<String>,
        images: HashMap<String, String>,
    ) -> Self {
        Self {
            command: command.unwrap_or_else(|| DEFAULT_COMMAND.to_string()),
            label_prefix: label_prefix.unwrap_or_else(|| DEFAULT_LABEL_PREFIX.to_string()),
            network,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            images,
            versions: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            next_job: AtomicU64::new(0),
        }
    }

    fn image(&self, service: &str, operation: &'static str) -> Result<&str, OrchestratorError> {
        self.images
            .get(service)
            .map(String::as_str)
            .ok_or_else(|| OrchestratorError::new(operation, service, "no image configured"))
    }

    async fn run(
        &self,
        operation: &'static str,
        target: &str,
        args: &[String],
    ) -> Result<String, OrchestratorError> {
        debug!(component = "orchestrator", command = %self.command, args = ?args, "exec");
        let output = timeout(
            self.call_timeout,
            Command::new(&self.command).args(args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| OrchestratorError::new(operation, target, "command timed out"))?
        .map_err(|e| OrchestratorError::new(operation, target, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::new(operation, target, stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn parse_ps_line(line: &str) -> Option<ReplicaStatus> {
        let mut parts = line.splitn(3, '|');
        let id = parts.next()?.trim();
        let version = parts.next()?.trim();
        let status = parts.next()?.trim();
        if id.is_empty() {
            return None;
        }
        let ready = status.starts_with("Up")
            && !status.contains("health: starting")
            && !status.contains("(unhealthy)");
        Some(ReplicaStatus {
            id: id.to_string(),
            version: version.to_string(),
            ready,
        })
    }

    async fn list(&self, service: &str) -> Result<Vec<ReplicaStatus>, OrchestratorError> {
        let args = vec![
            "ps".to_string(),
            "--filter".to_string(),
            format!("label={}.service={}", self.label_prefix, service),
            "--format".to_string(),
            format!(
                "{{{{.ID}}}}|{{{{.Label \"{}.version\"}}}}|{{{{.Status}}}}",
                self.label_prefix
            ),
        ];
        let out = self.run("get_replica_status", service, &args).await?;
        Ok(out.lines().filter_map(Self::parse_ps_line).collect())
    }
}

#[async_trait::async_trait]
impl Orchestrator for DockerOrchestrator {
    async fn set_replicas(&self, service: &str, count: usize) -> Result<(), OrchestratorError> {
        let current = self.list(service).await?;
        if current.len() < count {
            let version = self
                .versions
                .lock()
                .get(service)
                .cloned()
                .ok_or_else(|| OrchestratorError::new("set_replicas", service, "no image version set"))?;
            for _ in current.len()..count {
                self.start_replica(service, &version).await?;
            }
        } else {
            // `docker ps` lists newest first.
            for replica in current.iter().take(current.len() - count) {
                self.stop_replica(service, &replica.id).await?;
            }
        }
        Ok(())
    }

    async fn set_image_version(&self, service: &str, version: &str) -> Result<(), OrchestratorError> {
        self.image(service, "set_image_version")?;
        self.versions
            .lock()
            .insert(service.to_string(), version.to_string());
        Ok(())
    }

    async fn get_replica_status(&self, service: &str) -> Result<Vec<ReplicaStatus>, OrchestratorError> {
        self.list(service).await
    }

    async fn start_replica(&self, service: &str, version: &str) -> Result<ReplicaId, OrchestratorError> {
        let image = self.image(service, "start_replica")?;
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--label".to_string(),
            format!("{}.service={}", self.label_prefix, service),
            "--label".to_string(),
            format!("{}.version={}", self.label_prefix, version),
        ];
        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
            args.push("--network-alias".to_string());
            args.push(service.to_string());
        }
        args.push(format!("{image}:{version}"));

        let id = self.run("start_replica", service, &args).await?;
        let id: String = id.chars().take(12).collect();
        info!(component = "orchestrator", service = service, replica = %id, version = version, "container started");
        Ok(id)
    }

    async fn stop_replica(&self, service: &str, id: &str) -> Result<(), OrchestratorError> {
        let args = vec!["rm".to_string(), "-f".to_string(), id.to_string()];
        self.run("stop_replica", service, &args).await?;
        info!(component = "orchestrator", service = service, replica = %id, "container removed");
        Ok(())
    }

    async fn trigger_job(&self, spec: &JobSpec) -> Result<JobHandle, OrchestratorError> {
        let replicas = self.list(&spec.target).await?;
        let replica = replicas
            .iter()
            .find(|r| r.ready)
            .ok_or_else(|| OrchestratorError::new("trigger_job", spec.target.clone(), "no ready replica"))?;

        let child = Command::new(&self.command)
            .arg("exec")
            .arg(&replica.id)
            .args(&spec.command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OrchestratorError::new("trigger_job", spec.target.clone(), e.to_string()))?;

        let n = self.next_job.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = format!("{}-{}", spec.name, n);
        self.jobs.lock().insert(handle.clone(), child);
        Ok(JobHandle(handle))
    }

    async fn job_status(&self, handle: &JobHandle) -> Result<JobState, OrchestratorError> {
        let mut jobs = self.jobs.lock();
        let child = jobs
            .get_mut(&handle.0)
            .ok_or_else(|| OrchestratorError::new("job_status", handle.0.clone(), "no such job"))?;
        let state = match child.try_wait() {
            Ok(None) => return Ok(JobState::Running),
            Ok(Some(status)) if status.success() => JobState::Succeeded,
            Ok(Some(status)) => JobState::Failed(format!("job exited with {status}")),
            Err(e) => JobState::Failed(e.to_string()),
        };
        jobs.remove(&handle.0);
        Ok(state)
    }

    async fn cancel_job(&self, handle: &JobHandle) -> Result<(), OrchestratorError> {
        let Some(mut child) = self.jobs.lock().remove(&handle.0) else {
            return Ok(());
        };
        child
            .start_kill()
            .map_err(|e| OrchestratorError::new("cancel_job", handle.0.clone(), e.to_string()))?;
        info!(component = "orchestrator", job = %handle.0, "job killed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::DockerOrchestrator;

    #[test]
    fn test_parse_ps_line_readiness() {
        let up = DockerOrchestrator::parse_ps_line("abc123|v1|Up 5 minutes").unwrap();
        assert!(up.ready);
        assert_eq!(up.version, "v1");

        let healthy = DockerOrchestrator::parse_ps_line("abc123|v1|Up 5 minutes (healthy)").unwrap();
        assert!(healthy.ready);

        let starting =
            DockerOrchestrator::parse_ps_line("abc123|v1|Up 2 seconds (health: starting)").unwrap();
        assert!(!starting.ready);

        let unhealthy = DockerOrchestrator::parse_ps_line("abc123|v2|Up 1 minute (unhealthy)").unwrap();
        assert!(!unhealthy.ready);

        let exited = DockerOrchestrator::parse_ps_line("abc123|v2|Exited (1) 3 seconds ago").unwrap();
        assert!(!exited.ready);

        assert!(DockerOrchestrator::parse_ps_line("").is_none());
    }
}
