//! HTTP Server
//!
//! Binds the Control API and serves it until the shutdown token fires.

use crate::handler::{self, AppState};
use crate::rate_limiter::RateLimiter;
use axum::routing::{get, post};
use axum::Router;
use scanq_core::application::{JobQueue, ShutdownToken};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
const DEFAULT_HTTP_PORT: u16 = 5001;
const DEFAULT_RATE_LIMIT_BURST: u32 = 200;
const DEFAULT_RATE_LIMIT_RATE: u32 = 100;

/// HTTP Server Configuration
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
    pub rate_limit_burst: u32,
    pub rate_limit_rate: u32,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HTTP_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            rate_limit_rate: DEFAULT_RATE_LIMIT_RATE,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/tasks", post(handler::submit_task))
        .route(
            "/api/tasks/:job_id",
            get(handler::task_status).delete(handler::cancel_task),
        )
        .route("/api/health", get(handler::health))
        .route("/api/health/workers", get(handler::worker_health))
        .route("/api/modules", get(handler::list_modules))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

pub struct HttpServer {
    config: HttpServerConfig,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, queue: Arc<JobQueue>) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_burst, config.rate_limit_rate);
        Self {
            state: AppState::new(queue, limiter),
            config,
        }
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self, shutdown: ShutdownToken) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener; in-flight requests drain on shutdown
    pub async fn serve(self, listener: TcpListener, mut shutdown: ShutdownToken) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, "Control API listening");
        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;
        info!("Control API stopped");
        Ok(())
    }
}
