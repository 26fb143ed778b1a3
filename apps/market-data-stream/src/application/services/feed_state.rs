//! Per-Category Feed Health
//!
//! Connection state and counters for one category's upstream session.
//! Written by the feed session, read by the controller and the health
//! endpoint. Connection loss surfaces here rather than as an error from
//! `get`/`subscribe`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::streaming::Category;

/// Upstream connection state for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session running.
    #[default]
    Disconnected,
    /// Session is opening its upstream connection.
    Connecting,
    /// Session is streaming.
    Connected,
    /// Session stopped after a fatal upstream error.
    Error,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

/// Tracks the state of one category's upstream feed session.
#[derive(Debug)]
pub struct FeedState {
    category: Category,
    state: RwLock<ConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_event_at: RwLock<Option<DateTime<Utc>>>,
    error_message: RwLock<Option<String>>,
    subscription_count: AtomicUsize,
    events_received: AtomicU64,
    subscribe_failures: AtomicU64,
}

impl FeedState {
    /// Create a disconnected feed state.
    #[must_use]
    pub const fn new(category: Category) -> Self {
        Self {
            category,
            state: RwLock::new(ConnectionState::Disconnected),
            last_connected_at: RwLock::new(None),
            last_event_at: RwLock::new(None),
            error_message: RwLock::new(None),
            subscription_count: AtomicUsize::new(0),
            events_received: AtomicU64::new(0),
            subscribe_failures: AtomicU64::new(0),
        }
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.error_message.write() = None;
        }
    }

    /// Set an error state with message.
    pub fn set_error(&self, message: String) {
        *self.state.write() = ConnectionState::Error;
        *self.error_message.write() = Some(message);
    }

    /// Add to the events received counter.
    pub fn record_events(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.events_received
            .fetch_add(u64::try_from(count).unwrap_or(u64::MAX), Ordering::Relaxed);
        *self.last_event_at.write() = Some(Utc::now());
    }

    /// Increment the upstream subscribe failure counter.
    pub fn increment_subscribe_failures(&self) {
        self.subscribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the number of symbols forwarded upstream in this session.
    pub fn set_subscription_count(&self, count: usize) {
        self.subscription_count.store(count, Ordering::Relaxed);
    }

    /// Get the current connection state.
    #[must_use]
    pub fn get_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the session is currently streaming.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.get_state() == ConnectionState::Connected
    }

    /// Get events received count.
    #[must_use]
    pub fn get_events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }

    /// Get the last error message, if the session failed.
    #[must_use]
    pub fn get_error(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// Take a point-in-time copy of this state.
    #[must_use]
    pub fn snapshot(&self) -> FeedHealth {
        FeedHealth {
            category: self.category,
            state: self.get_state(),
            last_connected_at: *self.last_connected_at.read(),
            last_event_at: *self.last_event_at.read(),
            error_message: self.get_error(),
            subscription_count: self.subscription_count.load(Ordering::Relaxed),
            events_received: self.get_events_received(),
            subscribe_failures: self.subscribe_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time health of one category's feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedHealth {
    /// Category served by the feed.
    pub category: Category,
    /// Connection state.
    pub state: ConnectionState,
    /// When the session last connected.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// When the session last applied an event.
    pub last_event_at: Option<DateTime<Utc>>,
    /// Error that stopped the session, if any.
    pub error_message: Option<String>,
    /// Symbols forwarded upstream in the current session.
    pub subscription_count: usize,
    /// Events received since the process started.
    pub events_received: u64,
    /// Upstream subscribe failures since the process started.
    pub subscribe_failures: u64,
}
