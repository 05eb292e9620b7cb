// Per-service operator commands: scale, rollout, rollback, cancel.

use axum::{
    extract::{Path, Query},
    response::Response,
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

use super::reply;
use crate::command::Commands;
use crate::http::Controller;

#[derive(Debug, Deserialize)]
pub struct ScaleParams {
    pub to: usize,
}

#[derive(Debug, Deserialize)]
pub struct RolloutParams {
    pub version: String,
    pub batch: Option<usize>,
}

/// Serves `POST /api/v1/services/:name/{scale,rollout,rollback,cancel}`.
#[derive(Clone)]
pub struct ServiceCommandsController {
    commands: Arc<Commands>,
}

impl ServiceCommandsController {
    pub fn new(commands: Arc<Commands>) -> Self {
        Self { commands }
    }

    async fn scale(commands: Arc<Commands>, name: String, params: ScaleParams) -> Response {
        reply::result(commands.scale(&name, params.to).await)
    }

    async fn rollout(commands: Arc<Commands>, name: String, params: RolloutParams) -> Response {
        reply::result(commands.rollout(&name, &params.version, params.batch).await)
    }

    async fn rollback(commands: Arc<Commands>, name: String) -> Response {
        reply::result(commands.rollback(&name).await)
    }

    async fn cancel(commands: Arc<Commands>, name: String) -> Response {
        reply::result(commands.cancel(&name))
    }
}

impl Controller for ServiceCommandsController {
    fn add_route(&self, router: Router) -> Router {
        router
            .route(
                "/api/v1/services/:name/scale",
                post({
                    let commands = self.commands.clone();
                    move |Path(name): Path<String>, Query(params): Query<ScaleParams>| {
                        let commands = commands.clone();
                        async move { Self::scale(commands, name, params).await }
                    }
                }),
            )
            .route(
                "/api/v1/services/:name/rollout",
                post({
                    let commands = self.commands.clone();
                    move |Path(name): Path<String>, Query(params): Query<RolloutParams>| {
                        let commands = commands.clone();
                        async move { Self::rollout(commands, name, params).await }
                    }
                }),
            )
            .route(
                "/api/v1/services/:name/rollback",
                post({
                    let commands = self.commands.clone();
                    move |Path(name): Path<String>| {
                        let commands = commands.clone();
                        async move { Self::rollback(commands, name).await }
                    }
                }),
            )
            .route(
                "/api/v1/services/:name/cancel",
                post({
                    let commands = self.commands.clone();
                    move |Path(name): Path<String>| {
                        let commands = commands.clone();
                        async move { Self::cancel(commands, name).await }
                    }
                }),
            )
    }
}
