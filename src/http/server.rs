//! HTTP server implementation.
//

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::{Config, ConfigTrait};
use crate::controller::controller::Controller;

const DEFAULT_NAME: &str = "stackctl";
const DEFAULT_PORT: &str = "8040";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Server trait for HTTP server operations.
#[async_trait::async_trait]
pub trait Server: Send + Sync {
    /// Serves until the shutdown token is cancelled.
    async fn listen_and_serve(&self) -> Result<()>;

    fn is_alive(&self) -> bool;
}

/// Operator API server.
pub struct HttpServer {
    shutdown_token: CancellationToken,
    config: Config,
    router: Router,
    alive: AtomicBool,
}

impl HttpServer {
    pub fn new(
        shutdown_token: CancellationToken,
        config: Config,
        controllers: Vec<Box<dyn Controller>>,
    ) -> Result<Arc<Self>> {
        let request_timeout = config
            .api()
            .and_then(|api| api.timeout)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let router = Self::build_router(controllers, request_timeout);

        Ok(Arc::new(Self {
            shutdown_token,
            config,
            router,
            alive: AtomicBool::new(false),
        }))
    }

    /// Router with every controller and layer applied.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn listen_and_serve(&self) -> Result<()> {
        let api_cfg = self.config.api();
        let name = api_cfg.and_then(|a| a.name.as_deref()).unwrap_or(DEFAULT_NAME);
        let port = api_cfg.and_then(|a| a.port.as_deref()).unwrap_or(DEFAULT_PORT);

        // Ensure port starts with ':'
        let port = if port.starts_with(':') {
            port.to_string()
        } else {
            format!(":{}", port)
        };

        let addr: SocketAddr = format!("0.0.0.0{}", port)
            .parse()
            .context("Failed to parse server address")?;

        let listener = TcpListener::bind(&addr)
            .await
            .context("Failed to bind TCP listener")?;

        info!(component = "server", event = "started", name = name, port = port, "server started");
        self.alive.store(true, Ordering::Relaxed);

        let shutdown_token = self.shutdown_token.clone();
        let serve_future = axum::serve(listener, self.router.clone()).with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        });

        let result = serve_future.await;
        self.alive.store(false, Ordering::Relaxed);

        if let Err(e) = result {
            error!(
                component = "server",
                event = "listen_and_serve_failed",
                name = name,
                port = port,
                error = %e,
                "server failed to listen and serve"
            );
            return Err(e.into());
        }

        info!(component = "server", event = "stopped", name = name, port = port, "server stopped");
        Ok(())
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn build_router(controllers: Vec<Box<dyn Controller>>, request_timeout: Duration) -> Router {
        let mut router = Router::new();
        for controller in controllers {
            router = controller.add_route(router);
        }

        router.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout)),
        )
    }
}

#[async_trait::async_trait]
impl Server for HttpServer {
    async fn listen_and_serve(&self) -> Result<()> {
        HttpServer::listen_and_serve(self).await
    }

    fn is_alive(&self) -> bool {
        HttpServer::is_alive(self)
    }
}
