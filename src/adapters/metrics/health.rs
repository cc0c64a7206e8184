//! Health Check Server - Exporter Liveness Endpoint
//!
//! Exposes `/healthz` via axum 0.7 on a port separate from the metrics
//! endpoint. The status mirrors the last self-check published on a
//! `watch` channel by the health monitor: 200 when it passed, 503 when
//! it failed or has not run yet.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::{info, instrument};

use crate::domain::health::HealthState;
use crate::ports::health_check::HealthCheck;

/// Name of the exposition self-check.
pub const METRICS_EXPORT_CHECK: &str = "Check_Metrics_Export";

/// Self-check that fetches the exposition endpoint over HTTP.
///
/// Connections are not pooled: every run opens a fresh connection, so a
/// stopped server is detected on the next run.
pub struct HttpEndpointCheck {
    /// HTTP client without idle connection reuse.
    http: Client,
    /// URL of the exposition endpoint.
    url: String,
}

impl HttpEndpointCheck {
    /// Create a check against `url` with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .context("Failed to build health check HTTP client")?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl HealthCheck for HttpEndpointCheck {
    fn name(&self) -> &str {
        METRICS_EXPORT_CHECK
    }

    async fn check(&self) -> Result<(), String> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|_| "Service Unavailable".to_string())?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("Service Unavailable: status {}", response.status()))
        }
    }
}

/// One check in the `/healthz` body.
#[derive(Debug, Serialize)]
struct CheckReport {
    name: String,
    last_run_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// `/healthz` response body.
#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    version: String,
    checks: Vec<CheckReport>,
}

/// Shared handler state.
struct HealthContext {
    state_rx: watch::Receiver<HealthState>,
    version: String,
}

/// Axum-based health check HTTP server.
pub struct HealthServer {
    /// Latest self-check result.
    state_rx: watch::Receiver<HealthState>,
    /// Version string reported in every response.
    version: String,
}

impl HealthServer {
    /// Create a new health server.
    pub fn new(state_rx: watch::Receiver<HealthState>, version: impl Into<String>) -> Self {
        Self {
            state_rx,
            version: version.into(),
        }
    }

    /// Router with the `/healthz` route.
    pub fn router(&self) -> Router {
        let context = Arc::new(HealthContext {
            state_rx: self.state_rx.clone(),
            version: self.version.clone(),
        });
        Router::new()
            .route("/healthz", get(Self::healthz))
            .with_state(context)
    }

    /// Serve the health endpoint until shutdown.
    #[instrument(skip(self, listener, shutdown_rx))]
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let app = self.router();

        info!(address = %listener.local_addr()?, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness: 200 only if the last self-check passed.
    async fn healthz(State(context): State<Arc<HealthContext>>) -> impl IntoResponse {
        let state = context.state_rx.borrow().clone();
        let healthy = state.is_healthy();

        let error = match (&state.last_run_at, &state.last_error) {
            (None, _) => Some("check has not run yet".to_string()),
            (Some(_), err) => err.clone(),
        };
        let report = HealthReport {
            status: if healthy { "healthy" } else { "unhealthy" },
            version: context.version.clone(),
            checks: vec![CheckReport {
                name: state.check_name,
                last_run_at: state.last_run_at,
                error,
            }],
        };

        let status = if healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(report))
    }
}
