//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedProvider` / `FeedHandle`: upstream real-time market data feed
//! - `EventSink`: durable storage for processed events
//!
//! ## Driver Ports (Inbound)
//!
//! The caller API is `StreamController` itself (`subscribe`, `get`,
//! `start`, `stop`).

use async_trait::async_trait;

use crate::domain::streaming::{Category, MarketEvent, Symbol};

// =============================================================================
// Errors
// =============================================================================

/// Errors reported by a feed provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// Upstream rejected or failed a subscribe call. Transient: the session
    /// retries on its next poll cycle.
    #[error("upstream subscribe failed: {0}")]
    SubscribeFailed(String),

    /// The upstream connection is gone. Fatal for the category's session.
    #[error("upstream connection lost: {0}")]
    ConnectionLost(String),
}

impl FeedError {
    /// Whether the session must stop after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }

    /// Short label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SubscribeFailed(_) => "subscribe_failed",
            Self::ConnectionLost(_) => "connection_lost",
        }
    }
}

/// Errors reported by a persistence sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The batch could not be written.
    #[error("sink write failed: {0}")]
    WriteFailed(String),
}

// =============================================================================
// Feed Ports
// =============================================================================

/// Opens upstream sessions, one per category.
#[async_trait]
pub trait FeedProvider: Send + Sync {
    /// Open a session streaming events of `category`.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::ConnectionLost` if the connection cannot be
    /// established.
    async fn open_session(&self, category: Category) -> Result<Box<dyn FeedHandle>, FeedError>;
}

/// A live upstream session for a single category.
#[async_trait]
pub trait FeedHandle: Send {
    /// Ask the upstream feed to stream `symbols`. May block on the network.
    ///
    /// # Errors
    ///
    /// `FeedError::SubscribeFailed` for a transient rejection,
    /// `FeedError::ConnectionLost` if the connection dropped.
    async fn subscribe(&mut self, symbols: &[Symbol]) -> Result<(), FeedError>;

    /// Return every event currently available without waiting for more.
    ///
    /// # Errors
    ///
    /// `FeedError::ConnectionLost` if the connection dropped.
    async fn poll_events(&mut self) -> Result<Vec<MarketEvent>, FeedError>;

    /// Close the session. Called once when the session loop exits.
    async fn close(&mut self);
}

// =============================================================================
// Persistence Port
// =============================================================================

/// Durable storage for drained events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Persist a batch of events of `category`, in delivery order.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if the batch could not be stored.
    async fn persist(&self, category: Category, events: &[MarketEvent]) -> Result<(), SinkError>;
}
