// Read-only status queries.

use axum::{
    extract::Path,
    http::StatusCode,
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;

use super::reply;
use crate::command::Commands;
use crate::http::Controller;

/// Serves `GET /api/v1/status` and `GET /api/v1/status/:name`.
#[derive(Clone)]
pub struct StatusController {
    commands: Arc<Commands>,
}

impl StatusController {
    pub fn new(commands: Arc<Commands>) -> Self {
        Self { commands }
    }

    async fn all(commands: Arc<Commands>) -> Response {
        reply::json(StatusCode::OK, &commands.status())
    }

    async fn one(commands: Arc<Commands>, name: String) -> Response {
        reply::result(commands.status_of(&name))
    }
}

impl Controller for StatusController {
    fn add_route(&self, router: Router) -> Router {
        let all = self.commands.clone();
        let one = self.commands.clone();
        router
            .route(
                "/api/v1/status",
                get(move || {
                    let commands = all.clone();
                    async move { Self::all(commands).await }
                }),
            )
            .route(
                "/api/v1/status/:name",
                get(move |Path(name): Path<String>| {
                    let commands = one.clone();
                    async move { Self::one(commands, name).await }
                }),
            )
    }
}
