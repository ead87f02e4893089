//! HTTP endpoint serving the metrics snapshot.
//!
//! Exposes a single route, `/metrics`, in the Prometheus text format.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::metrics::{DdMetrics, TEXT_CONTENT_TYPE};

/// Create the router for the metrics endpoint.
pub fn create_router(metrics: Arc<DdMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<DdMetrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)],
            output,
        )
            .into_response(),
        Err(e) => {
            warn!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Bind the listener. Failure here is fatal for the process.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics listener on {}", addr))?;
    info!("Serving metrics on http://{}/metrics", listener.local_addr()?);
    Ok(listener)
}

/// Serve until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    metrics: Arc<DdMetrics>,
    shutdown: CancellationToken,
) -> Result<()> {
    axum::serve(listener, create_router(metrics))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Metrics server failed")
}
