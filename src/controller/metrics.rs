//! Metrics controller.

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::http::Controller;

pub const PROMETHEUS_METRICS_PATH: &str = "/metrics";

/// Handle used to render the global recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder as the global `metrics` recorder.
///
/// Call once from `main` before the runtime starts; later calls fail.
pub fn init_prometheus_exporter() -> anyhow::Result<()> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;
    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| anyhow::anyhow!("Prometheus handle already initialized"))?;

    Ok(())
}

/// PrometheusMetricsController serves the Prometheus text exposition.
#[derive(Default)]
pub struct PrometheusMetricsController;

impl PrometheusMetricsController {
    pub fn new() -> Self {
        Self
    }

    async fn get_metrics() -> impl IntoResponse {
        let body = match PROMETHEUS_HANDLE.get() {
            Some(handle) => handle.render(),
            None => "# metrics recorder is not installed\n".to_string(),
        };
        (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
    }
}

impl Controller for PrometheusMetricsController {
    fn add_route(&self, router: Router) -> Router {
        router.route(PROMETHEUS_METRICS_PATH, get(Self::get_metrics))
    }
}
