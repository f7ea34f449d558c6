//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, pipeline status reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status: broker link, pipeline counters, subscriptions
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (broker connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{IngestStats, Ingestor, WriterStats};
use crate::domain::subscription::SubscriptionStats;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Broker link.
    pub broker: BrokerStatus,
    /// Message counters.
    pub ingest: IngestStats,
    /// Batch writer counters.
    pub writer: WriterStats,
    /// Active topics.
    pub subscriptions: SubscriptionStats,
    /// Indices whose option ladder has been expanded.
    pub expanded_indices: Vec<String>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected and persisting.
    Healthy,
    /// Connected, but rows have been dropped after repeated flush failures.
    Degraded,
    /// Broker disconnected.
    Unhealthy,
}

/// Broker link status.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BrokerStatus {
    /// Session established.
    pub connected: bool,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    broker_connected: AtomicBool,
    reconnect_attempts: AtomicU32,
    ingestor: Arc<Ingestor>,
}

impl HealthServerState {
    /// Create state reporting on `ingestor`.
    #[must_use]
    pub fn new(version: String, ingestor: Arc<Ingestor>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            broker_connected: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            ingestor,
        }
    }

    /// Record a successful broker connection.
    pub fn mark_connected(&self) {
        self.broker_connected.store(true, Ordering::Relaxed);
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }

    /// Record a lost broker connection.
    pub fn mark_disconnected(&self) {
        self.broker_connected.store(false, Ordering::Relaxed);
    }

    /// Record a reconnection attempt.
    pub fn mark_reconnecting(&self, attempt: u32) {
        self.broker_connected.store(false, Ordering::Relaxed);
        self.reconnect_attempts.store(attempt, Ordering::Relaxed);
    }

    /// Current broker status.
    #[must_use]
    pub fn broker(&self) -> BrokerStatus {
        BrokerStatus {
            connected: self.broker_connected.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by [`HealthServer`].
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.broker().connected {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let broker = state.broker();
    let writer = state.ingestor.writer().stats();

    HealthResponse {
        status: determine_health_status(&broker, &writer),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        broker,
        ingest: state.ingestor.stats(),
        writer,
        subscriptions: state.ingestor.expander().active().stats(),
        expanded_indices: state.ingestor.tracker().expanded_indices(),
    }
}

const fn determine_health_status(broker: &BrokerStatus, writer: &WriterStats) -> HealthStatus {
    if !broker.connected {
        HealthStatus::Unhealthy
    } else if writer.rows_dropped > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
