//! Health and metrics HTTP endpoints
//!
//! A minimal HTTP server on its own port (distinct from the DNS port):
//!
//! | Path | Response |
//! |------|----------|
//! | `GET /health` | `{"status":"healthy","timestamp":"<RFC3339>"}` |
//! | `GET /metrics` | the same, plus a `metrics` counter object |
//!
//! Anything else is a 404. The server stops when its shutdown signal
//! fires; in-flight responses complete first.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{SinkholeError, SinkholeResult};
use crate::metrics::{Metrics, MetricsView};

/// Body of `/health` and `/metrics` responses
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// Always `"healthy"` while the process serves requests
    pub status: &'static str,
    /// RFC 3339 timestamp of the response
    pub timestamp: String,
    /// Counter snapshot, present only on `/metrics`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsView>,
}

/// Running health server
pub struct HealthServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl HealthServer {
    /// Bind `0.0.0.0:<port>` and start serving
    ///
    /// # Errors
    ///
    /// Returns a network error when the port cannot be bound.
    pub async fn bind(port: u16, metrics: Arc<Metrics>) -> SinkholeResult<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            SinkholeError::network_io(format!("failed to bind health server to {addr}"), e)
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SinkholeError::network_io("failed to get health server address", e))?;

        let app = Router::new()
            .route("/health", get(handle_health))
            .route("/metrics", get(handle_metrics))
            .with_state(metrics);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                error!(error = %e, "health server terminated with error");
            }
        });

        info!(addr = %local_addr, "health server listening");

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }

    /// The bound address (useful when started on port 0)
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal shutdown and wait for the server task to finish
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

async fn handle_health(State(_metrics): State<Arc<Metrics>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        timestamp: rfc3339_now(),
        metrics: None,
    })
}

async fn handle_metrics(State(metrics): State<Arc<Metrics>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        timestamp: rfc3339_now(),
        metrics: Some(metrics.health_view()),
    })
}

fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
