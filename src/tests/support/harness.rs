// In-process controller stack on the in-memory orchestrator.

use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::app::App;
use crate::backup::{BackupScheduler, MemoryBackupStore};
use crate::command::Commands;
use crate::config::{self, Config};
use crate::health::Prober;
use crate::http::HttpServer;
use crate::liveness;
use crate::orchestrator::MemoryOrchestrator;
use crate::registry::Registry;
use crate::rollout::RolloutManager;
use crate::scaler::Scaler;
use crate::startup::{StartupReport, StartupSequencer};

/// Every component wired the way `App` wires them, with handles kept for
/// assertions. Prober loops are not running until `watch` is called.
pub struct Stack {
    pub cfg: Config,
    pub orchestrator: Arc<MemoryOrchestrator>,
    pub registry: Arc<Registry>,
    pub prober: Arc<Prober>,
    pub sequencer: Arc<StartupSequencer>,
    pub rollouts: Arc<RolloutManager>,
    pub scaler: Arc<Scaler>,
    pub backups: Arc<BackupScheduler>,
    pub store: Arc<MemoryBackupStore>,
    pub commands: Arc<Commands>,
    pub shutdown: CancellationToken,
}

impl Stack {
    pub fn new(cfg: Config) -> Self {
        Self::with_store(cfg, Arc::new(MemoryBackupStore::new()))
    }

    pub fn with_store(cfg: Config, store: Arc<MemoryBackupStore>) -> Self {
        let graph = Arc::new(cfg.validate().expect("valid test config"));
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        let registry = Registry::from_config(&cfg);

        let prober = Prober::new(&cfg, orchestrator.clone(), registry.clone());
        let sequencer = StartupSequencer::new(&cfg, graph.clone(), orchestrator.clone(), registry.clone());
        let rollouts = RolloutManager::new(&cfg, orchestrator.clone(), registry.clone());
        let scaler = Scaler::new(&cfg, graph, orchestrator.clone(), registry.clone());
        let backups = BackupScheduler::new(&cfg, orchestrator.clone(), store.clone(), registry.publisher())
            .expect("valid backup jobs");
        let commands = Commands::new(
            registry.clone(),
            sequencer.clone(),
            rollouts.clone(),
            scaler.clone(),
            backups.clone(),
        );

        Self {
            cfg,
            orchestrator,
            registry,
            prober,
            sequencer,
            rollouts,
            scaler,
            backups,
            store,
            commands,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stack over the default three-tier test topology.
    pub fn default_stack() -> Self {
        Self::new(config::new_test_config())
    }

    /// Starts one prober loop per service.
    pub fn watch(&self) {
        self.prober.spawn_watchers(self.shutdown.clone());
    }

    /// Watches, starts every service and waits until all replicas are healthy.
    pub async fn started(cfg: Config) -> Self {
        let stack = Self::new(cfg);
        stack.watch();
        let report = stack.start().await;
        assert!(report.is_ready(), "startup failed: {:?}", report);
        for name in stack.registry.names() {
            stack.settle(&name).await;
        }
        stack
    }

    pub async fn start(&self) -> StartupReport {
        self.sequencer.start().await
    }

    /// Waits until every tracked replica of `service` is healthy.
    pub async fn settle(&self, service: &str) {
        let settled = self
            .registry
            .wait_until(service, Duration::from_secs(60), |r| {
                r.replicas.iter().all(|rep| r.is_replica_healthy(&rep.id))
            })
            .await
            .expect("known service");
        assert!(settled, "{service} replicas did not settle");
    }

    /// Operator API router over this stack.
    pub fn router(&self) -> Router {
        let probe = Arc::new(liveness::Probe::new(Duration::from_secs(1)));
        let server = HttpServer::new(
            self.shutdown.clone(),
            self.cfg.clone(),
            App::controllers(self.commands.clone(), probe),
        )
        .expect("router");
        server.router()
    }

    /// Replica versions of `service` as the orchestrator sees them, sorted.
    pub fn versions(&self, service: &str) -> Vec<String> {
        let mut versions: Vec<String> = self
            .orchestrator
            .replicas(service)
            .into_iter()
            .map(|r| r.version)
            .collect();
        versions.sort();
        versions
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
