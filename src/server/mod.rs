//! HTTP surface.
//!
//! ```text
//! POST /generate/stream  -> text/event-stream of PipelineEvent frames
//! POST /generate/cost    -> JSON quote (always 200)
//! GET  /healthz          -> {"ok": true, "status": "ok"}
//! ```

mod handlers;

pub use handlers::cost_payload;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{AppConfig, DEFAULT_HOST, DEFAULT_PORT};
use crate::pipeline::DiagramPipeline;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl From<&AppConfig> for ServerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address {0:?}")]
    Address(String),

    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) struct AppState {
    pub pipeline: Arc<DiagramPipeline>,
}

/// Build the router around a ready pipeline.
pub fn router(pipeline: Arc<DiagramPipeline>) -> Router {
    let state = Arc::new(AppState { pipeline });

    Router::new()
        .route("/generate/stream", post(handlers::generate_stream))
        .route("/generate/cost", post(handlers::generate_cost))
        .route("/healthz", get(handlers::healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn run_server(
    config: ServerConfig,
    pipeline: Arc<DiagramPipeline>,
) -> Result<(), ServerError> {
    let raw = format!("{}:{}", config.host, config.port);
    let addr: SocketAddr = raw.parse().map_err(|_| ServerError::Address(raw.clone()))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "starting server");

    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received, stopping server");
}
