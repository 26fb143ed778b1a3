#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Data Stream - Live Cache and Subscription Manager
//!
//! Keeps the most recent quote, trade and greeks event per symbol in memory,
//! fed by one background session per category against an upstream real-time
//! feed. Callers subscribe to symbols and read the latest cached events
//! without ever waiting on the network.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types and in-memory state
//!   - `streaming`: Categories and event payloads (quotes, trades, greeks)
//!   - `cache`: Latest event per (category, symbol)
//!   - `subscription`: Subscribed and pending symbol sets
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed provider and persistence sink interfaces
//!   - `services`: Stream controller, feed sessions, feed health
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `simulated`: Offline feed provider
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//! subscribe() ──► SubscriptionSet ──drain──► FeedSession ──subscribe──► upstream
//!                                                 │
//! get() ◄──────── EventCache ◄────put_all─────────┘◄──poll_events──── upstream
//!                                                 └──persist──► EventSink (optional)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use market_data_stream::{Category, ControllerConfig, SimulatedFeedProvider, StreamController};
//!
//! # async fn demo() -> Result<(), market_data_stream::ControllerError> {
//! let controller = StreamController::new(
//!     ControllerConfig::default(),
//!     Arc::new(SimulatedFeedProvider::new(4)),
//! );
//! controller.subscribe(Category::Quote, &["IBM"]);
//! controller.start()?;
//!
//! let quotes = controller.get(Category::Quote, &["IBM"]);
//! # let _ = quotes;
//! controller.stop().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::{CacheStats, EventCache};
pub use domain::streaming::{
    Category, GreeksEvent, InvalidCategory, MarketEvent, QuoteEvent, Symbol, TradeEvent,
};
pub use domain::subscription::{SubscriptionSet, SubscriptionStats, TotalSubscriptionStats};

// Ports
pub use application::ports::{EventSink, FeedError, FeedHandle, FeedProvider, SinkError};

// Services
pub use application::services::{
    ConnectionState, ControllerConfig, ControllerError, ControllerState, ControllerStatus,
    FeedHealth, StreamController,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, ServerSettings, SessionSettings, SimulatedSettings, StreamConfig,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Simulated feed
pub use infrastructure::simulated::SimulatedFeedProvider;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
