//! Auxiliary HTTP server exposing metrics and liveness

mod handlers;

pub use handlers::create_router;

use crate::telemetry::InMemoryMetrics;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<InMemoryMetrics>,
}

impl AppState {
    pub fn new(metrics: Arc<InMemoryMetrics>) -> Self {
        Self { metrics }
    }
}

/// Serve until `shutdown` fires, then give open connections `grace` to finish
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
    grace: Duration,
) -> io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "Metrics server listening");

    let signal = shutdown.clone();
    let app = create_router(state);
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await
    });

    tokio::select! {
        result = &mut server => return result.map_err(io::Error::other)?,
        () = shutdown.cancelled() => {}
    }

    match tokio::time::timeout(grace, &mut server).await {
        Ok(result) => result.map_err(io::Error::other)??,
        Err(_) => {
            tracing::warn!(grace_secs = grace.as_secs(), "Metrics server did not drain in time");
            server.abort();
        }
    }
    tracing::info!("Metrics server stopped");
    Ok(())
}
