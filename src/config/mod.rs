// Configuration loading and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ControllerError;
use crate::health::HealthSettings;
use crate::topology::DependencyGraph;

pub const PROD: &str = "prod";
pub const DEV: &str = "dev";
pub const DEBUG: &str = "debug";
pub const TEST: &str = "test";

const DEFAULT_MAX_REPLICAS: usize = 10;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Stack {
    #[serde(rename = "controller")]
    pub controller: ControllerBox,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerBox {
    pub env: String,
    pub logs: Option<Logs>,
    pub api: Option<Api>,
    pub k8s: Option<K8S>,
    pub orchestrator: Option<OrchestratorCfg>,
    #[serde(default)]
    pub health: Health,
    #[serde(default)]
    pub startup: Startup,
    #[serde(default)]
    pub rollout: Rollout,
    #[serde(default)]
    pub scaler: Scaler,
    pub backups: Option<Backups>,
    pub services: BTreeMap<String, ServiceSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logs {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Api {
    pub name: Option<String>,
    pub port: Option<String>,
    /// Upper bound for one operator request; rollouts run inside it.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Probe {
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct K8S {
    pub probe: Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorKind {
    #[default]
    Memory,
    Docker,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OrchestratorCfg {
    #[serde(default)]
    pub kind: OrchestratorKind,
    pub command: Option<String>,
    pub network: Option<String>,
    #[serde(rename = "label_prefix")]
    pub label_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Health {
    #[serde(default = "default_probe_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(rename = "healthy_threshold", default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
    #[serde(rename = "unhealthy_threshold", default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            interval: default_probe_interval(),
            timeout: default_probe_timeout(),
            healthy_threshold: default_healthy_threshold(),
            unhealthy_threshold: default_unhealthy_threshold(),
        }
    }
}

/// Per-service health-check overrides; unset fields fall back to `health`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HealthOverride {
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(rename = "healthy_threshold")]
    pub healthy_threshold: Option<u32>,
    #[serde(rename = "unhealthy_threshold")]
    pub unhealthy_threshold: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Startup {
    #[serde(default = "default_startup_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(rename = "on_boot", default)]
    pub on_boot: bool,
}

impl Default for Startup {
    fn default() -> Self {
        Self {
            timeout: default_startup_timeout(),
            on_boot: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rollout {
    #[serde(rename = "batch_size", default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(rename = "batch_timeout", default = "default_batch_timeout", with = "humantime_serde")]
    pub batch_timeout: Duration,
}

impl Default for Rollout {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout: default_batch_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Scaler {
    #[serde(default = "default_scale_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for Scaler {
    fn default() -> Self {
        Self {
            timeout: default_scale_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Backups {
    #[serde(default = "default_backup_tick", with = "humantime_serde")]
    pub tick: Duration,
    #[serde(rename = "poll_interval", default = "default_backup_poll", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(rename = "store_path")]
    pub store_path: Option<String>,
    #[serde(default)]
    pub jobs: Vec<BackupJobSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackupJobSpec {
    pub name: String,
    pub target: String,
    /// Six-field cron expression (`sec min hour day month weekday`).
    pub schedule: String,
    #[serde(default = "default_backup_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceSpec {
    pub image: Option<String>,
    pub version: String,
    pub replicas: usize,
    pub min: Option<usize>,
    pub max: Option<usize>,
    #[serde(rename = "depends_on", default)]
    pub depends_on: Vec<String>,
    pub health: Option<HealthOverride>,
}

impl ServiceSpec {
    /// Inclusive replica bounds.
    pub fn bounds(&self) -> (usize, usize) {
        (
            self.min.unwrap_or(0),
            self.max.unwrap_or(DEFAULT_MAX_REPLICAS.max(self.replicas)),
        )
    }
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_healthy_threshold() -> u32 {
    3
}

fn default_unhealthy_threshold() -> u32 {
    2
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_batch_size() -> usize {
    1
}

fn default_batch_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_scale_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_backup_tick() -> Duration {
    Duration::from_secs(1)
}

fn default_backup_poll() -> Duration {
    Duration::from_secs(5)
}

fn default_backup_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

// Config trait
pub trait ConfigTrait {
    fn logs(&self) -> Option<&Logs>;
    fn is_prod(&self) -> bool;
    fn is_debug(&self) -> bool;
    fn is_dev(&self) -> bool;
    fn is_test(&self) -> bool;
    fn api(&self) -> Option<&Api>;
    fn k8s(&self) -> Option<&K8S>;
    fn orchestrator(&self) -> OrchestratorCfg;
    fn health(&self) -> &Health;
    fn startup(&self) -> &Startup;
    fn rollout(&self) -> &Rollout;
    fn scaler(&self) -> &Scaler;
    fn backups(&self) -> Option<&Backups>;
    fn services(&self) -> &BTreeMap<String, ServiceSpec>;
    fn service(&self, name: &str) -> Option<&ServiceSpec>;
    fn health_for(&self, name: &str) -> HealthSettings;
    fn images(&self) -> HashMap<String, String>;
}

// Config type alias for convenience
pub type Config = Stack;

impl ConfigTrait for Config {
    fn logs(&self) -> Option<&Logs> {
        self.controller.logs.as_ref()
    }

    fn is_prod(&self) -> bool {
        self.controller.env == PROD
    }

    fn is_debug(&self) -> bool {
        self.controller.env == DEBUG
    }

    fn is_dev(&self) -> bool {
        self.controller.env == DEV
    }

    fn is_test(&self) -> bool {
        self.controller.env == TEST
    }

    fn api(&self) -> Option<&Api> {
        self.controller.api.as_ref()
    }

    fn k8s(&self) -> Option<&K8S> {
        self.controller.k8s.as_ref()
    }

    fn orchestrator(&self) -> OrchestratorCfg {
        self.controller.orchestrator.clone().unwrap_or_default()
    }

    fn health(&self) -> &Health {
        &self.controller.health
    }

    fn startup(&self) -> &Startup {
        &self.controller.startup
    }

    fn rollout(&self) -> &Rollout {
        &self.controller.rollout
    }

    fn scaler(&self) -> &Scaler {
        &self.controller.scaler
    }

    fn backups(&self) -> Option<&Backups> {
        self.controller.backups.as_ref()
    }

    fn services(&self) -> &BTreeMap<String, ServiceSpec> {
        &self.controller.services
    }

    fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.controller.services.get(name)
    }

    fn health_for(&self, name: &str) -> HealthSettings {
        let base = &self.controller.health;
        let ov = self
            .service(name)
            .and_then(|s| s.health.clone())
            .unwrap_or_default();
        HealthSettings {
            interval: ov.interval.unwrap_or(base.interval),
            timeout: ov.timeout.unwrap_or(base.timeout),
            healthy_threshold: ov.healthy_threshold.unwrap_or(base.healthy_threshold),
            unhealthy_threshold: ov.unhealthy_threshold.unwrap_or(base.unhealthy_threshold),
        }
    }

    fn images(&self) -> HashMap<String, String> {
        self.controller
            .services
            .iter()
            .map(|(name, spec)| (name.clone(), spec.image.clone().unwrap_or_else(|| name.clone())))
            .collect()
    }
}

impl Config {
    /// Loads configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Resolve absolute path
        let abs_path = path
            .canonicalize()
            .with_context(|| format!("failed to resolve absolute config filepath: {:?}", path))?;

        let data = std::fs::read_to_string(&abs_path)
            .with_context(|| format!("read config yaml file {:?}", abs_path))?;

        Self::parse(&data).with_context(|| format!("load config from {:?}", abs_path))
    }

    /// Parses and validates configuration from YAML text.
    pub fn parse(data: &str) -> Result<Self> {
        let cfg: Stack = serde_yaml::from_str(data).context("unmarshal yaml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks cross-field invariants and returns the dependency graph they imply.
    pub fn validate(&self) -> Result<DependencyGraph, ControllerError> {
        if self.controller.services.is_empty() {
            return Err(ControllerError::Config("no services configured".into()));
        }

        for (name, spec) in &self.controller.services {
            let (min, max) = spec.bounds();
            if min > max {
                return Err(ControllerError::Config(format!(
                    "service {name}: min {min} is greater than max {max}"
                )));
            }
            if spec.replicas < min || spec.replicas > max {
                return Err(ControllerError::Config(format!(
                    "service {name}: replicas {} outside [{min}, {max}]",
                    spec.replicas
                )));
            }
            let health = self.health_for(name);
            if health.healthy_threshold == 0 || health.unhealthy_threshold == 0 {
                return Err(ControllerError::Config(format!(
                    "service {name}: health thresholds must be at least 1"
                )));
            }
            if health.interval.is_zero() {
                return Err(ControllerError::Config(format!(
                    "service {name}: health interval must be positive"
                )));
            }
        }

        if self.controller.rollout.batch_size == 0 {
            return Err(ControllerError::Config("rollout.batch_size must be at least 1".into()));
        }

        let graph = DependencyGraph::new(
            self.controller
                .services
                .iter()
                .map(|(name, spec)| (name.clone(), spec.depends_on.clone())),
        )?;

        if let Some(backups) = &self.controller.backups {
            if backups.tick.is_zero() || backups.poll_interval.is_zero() {
                return Err(ControllerError::Config(
                    "backups.tick and backups.poll_interval must be positive".into(),
                ));
            }
            let mut seen = std::collections::HashSet::new();
            for job in &backups.jobs {
                if !seen.insert(job.name.as_str()) {
                    return Err(ControllerError::Config(format!(
                        "duplicate backup job {}",
                        job.name
                    )));
                }
                if !self.controller.services.contains_key(&job.target) {
                    return Err(ControllerError::Config(format!(
                        "backup job {} targets unknown service {}",
                        job.name, job.target
                    )));
                }
                if job.command.is_empty() {
                    return Err(ControllerError::Config(format!(
                        "backup job {} has no command",
                        job.name
                    )));
                }
                cron::Schedule::from_str(&job.schedule).map_err(|e| {
                    ControllerError::Config(format!(
                        "backup job {}: invalid cron expression {:?}: {e}",
                        job.name, job.schedule
                    ))
                })?;
            }
        }

        Ok(graph)
    }
}

// Test config is always available for integration tests
mod test_config;
pub use test_config::new_test_config;

#[cfg(test)]
mod config_test;
