// Liveness probe controller.

use axum::{http::StatusCode, response::Response, routing::get, Router};
use serde::Serialize;
use std::sync::Arc;

use super::reply;
use crate::http::Controller;
use crate::liveness;

pub const PROBE_PATH: &str = "/k8s/probe";

#[derive(Serialize)]
struct ProbeReply {
    ok: bool,
    status: &'static str,
}

/// LivenessProbeController answers Kubernetes liveness probes.
#[derive(Clone)]
pub struct LivenessProbeController {
    probe: Arc<liveness::Probe>,
}

impl LivenessProbeController {
    pub fn new(probe: Arc<liveness::Probe>) -> Self {
        Self { probe }
    }

    async fn probe(probe: Arc<liveness::Probe>) -> Response {
        if probe.is_alive() {
            reply::json(StatusCode::OK, &ProbeReply { ok: true, status: "alive" })
        } else {
            reply::json(
                StatusCode::SERVICE_UNAVAILABLE,
                &ProbeReply {
                    ok: false,
                    status: "gone_away",
                },
            )
        }
    }
}

impl Controller for LivenessProbeController {
    fn add_route(&self, router: Router) -> Router {
        let probe = self.probe.clone();
        router.route(
            PROBE_PATH,
            get(move || {
                let probe = probe.clone();
                async move { Self::probe(probe).await }
            }),
        )
    }
}
