// Startup command controller.

use axum::{response::Response, routing::post, Router};
use std::sync::Arc;

use super::reply;
use crate::command::Commands;
use crate::http::Controller;

/// Serves `POST /api/v1/start`: brings the whole stack up in dependency order.
#[derive(Clone)]
pub struct StartController {
    commands: Arc<Commands>,
}

impl StartController {
    pub fn new(commands: Arc<Commands>) -> Self {
        Self { commands }
    }

    async fn start(commands: Arc<Commands>) -> Response {
        reply::result(commands.start().await)
    }
}

impl Controller for StartController {
    fn add_route(&self, router: Router) -> Router {
        let commands = self.commands.clone();
        router.route(
            "/api/v1/start",
            post(move || {
                let commands = commands.clone();
                async move { Self::start(commands).await }
            }),
        )
    }
}
