// Main entrypoint for the stackctl service lifecycle controller.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use stackctl::app::App;
use stackctl::backup::{BackupStore, FileBackupStore, MemoryBackupStore};
use stackctl::config::{Config, ConfigTrait, OrchestratorKind};
use stackctl::liveness;
use stackctl::orchestrator::{DockerOrchestrator, MemoryOrchestrator, Orchestrator};
use stackctl::shutdown::GracefulShutdown;

const CONFIG_PATH: &str = "cfg/stackctl.cfg.yaml";
const CONFIG_PATH_LOCAL: &str = "cfg/stackctl.cfg.local.yaml";
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(60);

/// stackctl - service lifecycle controller for a three-tier application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Custom config file path
    #[arg(short, long, value_name = "FILE")]
    cfg: Option<PathBuf>,
}

/// Loads the configuration struct from YAML file.
/// Tries local config first, then falls back to default config.
fn load_cfg(path: Option<PathBuf>) -> Result<(Config, String)> {
    if let Some(custom_path) = path {
        let cfg = Config::load(&custom_path)
            .with_context(|| format!("failed to load custom config from {:?}", custom_path))?;
        return Ok((cfg, custom_path.display().to_string()));
    }

    match Config::load(PathBuf::from(CONFIG_PATH_LOCAL)) {
        Ok(cfg) => Ok((cfg, CONFIG_PATH_LOCAL.to_string())),
        Err(_) => {
            let cfg = Config::load(PathBuf::from(CONFIG_PATH))
                .with_context(|| format!("failed to load config from {}", CONFIG_PATH))?;
            Ok((cfg, CONFIG_PATH.to_string()))
        }
    }
}

/// Configures structured logging based on configuration.
fn configure_logger(cfg: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let log_level = cfg
        .logs()
        .and_then(|logs| logs.level.as_ref())
        .map(|s| s.as_str())
        .unwrap_or("info");

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if cfg.is_prod() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }
}

fn build_orchestrator(cfg: &Config) -> Arc<dyn Orchestrator> {
    let orch = cfg.orchestrator();
    match orch.kind {
        OrchestratorKind::Memory => Arc::new(MemoryOrchestrator::new()),
        OrchestratorKind::Docker => Arc::new(DockerOrchestrator::new(
            orch.command,
            orch.label_prefix,
            orch.network,
            cfg.images(),
        )),
    }
}

fn build_store(cfg: &Config) -> Arc<dyn BackupStore> {
    match cfg.backups().and_then(|b| b.store_path.clone()) {
        Some(path) => Arc::new(FileBackupStore::new(path)),
        None => Arc::new(MemoryBackupStore::new()),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // The recorder must be installed before the runtime starts.
    if let Err(e) = stackctl::controller::metrics::init_prometheus_exporter() {
        eprintln!("Warning: Failed to initialize Prometheus metrics exporter: {}", e);
        eprintln!("Metrics endpoint will not be available");
    }

    tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?
        .block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    let shutdown_token = CancellationToken::new();

    let (cfg, path) = load_cfg(args.cfg)?;
    configure_logger(&cfg);
    info!(component = "config", event = "load_success", path = %path, env = %cfg.controller.env, "config loaded");

    let graceful_shutdown = Arc::new(GracefulShutdown::new(shutdown_token.clone(), GRACEFUL_TIMEOUT));

    let probe_timeout = cfg
        .k8s()
        .and_then(|k8s| k8s.probe.timeout)
        .unwrap_or(Duration::from_secs(5));
    let probe = Arc::new(liveness::Probe::new(probe_timeout));

    let orchestrator = build_orchestrator(&cfg);
    let store = build_store(&cfg);
    let app = App::new(shutdown_token.clone(), cfg, orchestrator, store, probe)?;

    graceful_shutdown.add(1);
    if let Err(e) = app.serve(graceful_shutdown.clone()).await {
        error!(component = "main", scope = "app", event = "start_failed", error = %e, "failed to start app");
        graceful_shutdown.done();
        shutdown_token.cancel();
    }

    if let Err(e) = graceful_shutdown.await_shutdown().await {
        error!(
            component = "main",
            scope = "service",
            event = "graceful_shutdown_failed",
            error = %e,
            "failed to gracefully shut down service"
        );
        return Err(e);
    }

    Ok(())
}
