// Backup job queries and manual triggers.

use axum::{
    extract::Path,
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::reply;
use crate::command::Commands;
use crate::http::Controller;

/// Serves `GET /api/v1/backups` and `POST /api/v1/backups/:job/run`.
#[derive(Clone)]
pub struct BackupsController {
    commands: Arc<Commands>,
}

impl BackupsController {
    pub fn new(commands: Arc<Commands>) -> Self {
        Self { commands }
    }

    async fn list(commands: Arc<Commands>) -> Response {
        reply::json(StatusCode::OK, &commands.backups())
    }

    async fn run(commands: Arc<Commands>, job: String) -> Response {
        match commands.backup_now(&job) {
            Ok(accepted) => reply::json(StatusCode::ACCEPTED, &accepted),
            Err(e) => reply::error(&e),
        }
    }
}

impl Controller for BackupsController {
    fn add_route(&self, router: Router) -> Router {
        let list = self.commands.clone();
        let run = self.commands.clone();
        router
            .route(
                "/api/v1/backups",
                get(move || {
                    let commands = list.clone();
                    async move { Self::list(commands).await }
                }),
            )
            .route(
                "/api/v1/backups/:job/run",
                post(move |Path(job): Path<String>| {
                    let commands = run.clone();
                    async move { Self::run(commands, job).await }
                }),
            )
    }
}
