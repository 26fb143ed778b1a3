//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the process-level concerns
//! (configuration, telemetry, metrics, health endpoint).

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Offline feed provider producing synthetic events.
pub mod simulated;

/// OpenTelemetry tracing integration.
pub mod telemetry;
