// Controller application: wires components together and runs their loops.

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backup::{BackupScheduler, BackupStore};
use crate::command::Commands;
use crate::config::{Config, ConfigTrait};
use crate::controller;
use crate::health::Prober;
use crate::http::{Controller, HttpServer};
use crate::liveness;
use crate::orchestrator::Orchestrator;
use crate::registry::{log_events, Registry};
use crate::rollout::RolloutManager;
use crate::scaler::Scaler;
use crate::startup::StartupSequencer;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// The whole controller: registry, prober, operators, scheduler and API.
pub struct App {
    cfg: Config,
    shutdown_token: CancellationToken,
    registry: Arc<Registry>,
    prober: Arc<Prober>,
    backups: Arc<BackupScheduler>,
    commands: Arc<Commands>,
    server: Arc<HttpServer>,
    probe: Arc<liveness::Probe>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    pub fn new(
        shutdown_token: CancellationToken,
        cfg: Config,
        orchestrator: Arc<dyn Orchestrator>,
        store: Arc<dyn BackupStore>,
        probe: Arc<liveness::Probe>,
    ) -> Result<Arc<Self>> {
        let graph = Arc::new(cfg.validate()?);
        let registry = Registry::from_config(&cfg);

        let prober = Prober::new(&cfg, orchestrator.clone(), registry.clone());
        let sequencer = StartupSequencer::new(&cfg, graph.clone(), orchestrator.clone(), registry.clone());
        let rollouts = RolloutManager::new(&cfg, orchestrator.clone(), registry.clone());
        let scaler = Scaler::new(&cfg, graph, orchestrator.clone(), registry.clone());
        let backups = BackupScheduler::new(&cfg, orchestrator, store, registry.publisher())?;
        let commands = Commands::new(registry.clone(), sequencer, rollouts, scaler, backups.clone());

        let server = HttpServer::new(
            shutdown_token.clone(),
            cfg.clone(),
            Self::controllers(commands.clone(), probe.clone()),
        )?;

        Ok(Arc::new(Self {
            cfg,
            shutdown_token,
            registry,
            prober,
            backups,
            commands,
            server,
            probe,
            loops: Mutex::new(Vec::new()),
        }))
    }

    /// Every HTTP controller of the operator API.
    pub(crate) fn controllers(commands: Arc<Commands>, probe: Arc<liveness::Probe>) -> Vec<Box<dyn Controller>> {
        vec![
            // Healthcheck probe endpoint
            Box::new(controller::LivenessProbeController::new(probe)),
            // Metrics endpoint
            Box::new(controller::PrometheusMetricsController::new()),
            // Dependency-ordered startup
            Box::new(controller::StartController::new(commands.clone())),
            // Scale, rollout, rollback, cancel
            Box::new(controller::ServiceCommandsController::new(commands.clone())),
            // Service records
            Box::new(controller::StatusController::new(commands.clone())),
            // Backup records and manual runs
            Box::new(controller::BackupsController::new(commands)),
        ]
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn commands(&self) -> &Arc<Commands> {
        &self.commands
    }

    pub fn server(&self) -> &Arc<HttpServer> {
        &self.server
    }

    /// Starts background loops and the API server. Returns once they are spawned;
    /// `gsh.done()` is called when the server has stopped and the app closed.
    pub async fn serve(self: &Arc<Self>, gsh: Arc<crate::shutdown::GracefulShutdown>) -> Result<()> {
        self.probe
            .watch(vec![self.clone() as Arc<dyn liveness::Service>]);

        if let Err(e) = self.backups.restore(Utc::now()).await {
            warn!(component = "app", scope = "backups", event = "restore_failed", error = %e, "starting with empty backup history");
        }

        let mut loops = Vec::new();
        loops.push(tokio::spawn(log_events(
            self.shutdown_token.clone(),
            self.registry.events(),
        )));
        loops.extend(self.prober.spawn_watchers(self.shutdown_token.clone()));
        loops.push(tokio::spawn(self.backups.clone().serve(self.shutdown_token.clone())));

        *self.loops.lock() = loops;

        if self.cfg.startup().on_boot {
            let commands = self.commands.clone();
            tokio::spawn(async move {
                match commands.start().await {
                    Ok(reply) => info!(component = "app", event = "boot_startup", ready = reply.ok, "startup on boot finished"),
                    Err(e) => error!(component = "app", event = "boot_startup", error = %e, "startup on boot failed"),
                }
            });
        }

        let app = self.clone();
        tokio::spawn(async move {
            if let Err(e) = app.server.listen_and_serve().await {
                error!(
                    component = "app",
                    scope = "server",
                    event = "serve_failed",
                    error = %e,
                    "server failed to serve"
                );
            }
            app.close().await;
            gsh.done();
        });

        info!(component = "app", event = "started", services = self.registry.names().len(), "application lifecycle");
        Ok(())
    }

    /// Alive while the API server runs and no background loop died early.
    pub fn is_alive(&self) -> bool {
        if !self.server.is_alive() {
            warn!(component = "app", scope = "http_server", event = "gone_away", "http server has gone away");
            return false;
        }
        if !self.shutdown_token.is_cancelled() && self.loops.lock().iter().any(|h| h.is_finished()) {
            warn!(component = "app", scope = "loops", event = "gone_away", "background loop exited");
            return false;
        }
        true
    }

    async fn close(&self) {
        self.shutdown_token.cancel();

        let loops = std::mem::take(&mut *self.loops.lock());
        let total = loops.len();
        if tokio::time::timeout(CLOSE_TIMEOUT, join_all(loops)).await.is_err() {
            warn!(component = "app", event = "loop_stuck", loops = total, "background loops did not stop in time");
        }

        info!(component = "app", event = "stopped", "application lifecycle");
    }
}

impl liveness::Service for App {
    fn is_alive(&self, _timeout: Duration) -> bool {
        App::is_alive(self)
    }
}
