//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness check (simple OK)
//! - `GET /readyz` - Kubernetes readiness check (controller running, a feed connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{
    ConnectionState, ControllerState, ControllerStatus, FeedHealth, StreamController,
};
use crate::domain::cache::CacheStats;
use crate::domain::streaming::Category;
use crate::domain::subscription::TotalSubscriptionStats;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Controller lifecycle state.
    pub controller: ControllerState,
    /// Feed session status per category.
    pub feeds: FeedsStatus,
    /// Cached event counts.
    pub cache: CacheStats,
    /// Subscription counts.
    pub subscriptions: TotalSubscriptionStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Some systems degraded but functional.
    Degraded,
    /// Critical systems unavailable.
    Unhealthy,
}

/// Feed session status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedsStatus {
    /// Greeks feed status.
    pub greeks: FeedInfo,
    /// Trade feed status.
    pub trade: FeedInfo,
    /// Quote feed status.
    pub quote: FeedInfo,
}

impl FeedsStatus {
    fn connected_count(&self) -> usize {
        [&self.greeks, &self.trade, &self.quote]
            .iter()
            .filter(|f| f.connected)
            .count()
    }
}

/// Individual feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: String,
    /// Whether this feed is connected.
    pub connected: bool,
    /// Events received count.
    pub events_received: u64,
    /// Symbols forwarded upstream in the current session.
    pub subscription_count: usize,
    /// Upstream subscribe failures.
    pub subscribe_failures: u64,
    /// When the feed last delivered an event.
    pub last_event_at: Option<DateTime<Utc>>,
    /// Error that stopped the session, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&FeedHealth> for FeedInfo {
    fn from(health: &FeedHealth) -> Self {
        Self {
            state: health.state.as_str().to_string(),
            connected: health.state == ConnectionState::Connected,
            events_received: health.events_received,
            subscription_count: health.subscription_count,
            subscribe_failures: health.subscribe_failures,
            last_event_at: health.last_event_at,
            error: health.error_message.clone(),
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    controller: Arc<StreamController>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, controller: Arc<StreamController>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            controller,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Build the health router.
#[must_use]
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

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
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
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
    let status = state.controller.status();

    if is_ready(&status) {
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
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let status = state.controller.status();
    let feeds = feeds_status(&status);

    HealthResponse {
        status: determine_health_status(status.state, &feeds),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        controller: status.state,
        feeds,
        cache: status.cache,
        subscriptions: status.subscriptions,
    }
}

fn feeds_status(status: &ControllerStatus) -> FeedsStatus {
    let info = |category: Category| {
        status
            .feeds
            .iter()
            .find(|f| f.category == category)
            .map_or_else(FeedInfo::disconnected, FeedInfo::from)
    };

    FeedsStatus {
        greeks: info(Category::Greeks),
        trade: info(Category::Trade),
        quote: info(Category::Quote),
    }
}

impl FeedInfo {
    fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected.as_str().to_string(),
            connected: false,
            events_received: 0,
            subscription_count: 0,
            subscribe_failures: 0,
            last_event_at: None,
            error: None,
        }
    }
}

fn is_ready(status: &ControllerStatus) -> bool {
    status.state == ControllerState::Running && status.connected_feeds() > 0
}

fn determine_health_status(controller: ControllerState, feeds: &FeedsStatus) -> HealthStatus {
    if controller != ControllerState::Running {
        return HealthStatus::Unhealthy;
    }

    match feeds.connected_count() {
        3 => HealthStatus::Healthy,
        1 | 2 => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
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
