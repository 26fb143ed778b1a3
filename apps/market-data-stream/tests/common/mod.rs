//! Shared test fixtures: an in-memory upstream feed the tests can drive.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use market_data_stream::{
    Category, ControllerConfig, EventSink, FeedError, FeedHandle, FeedProvider, MarketEvent,
    QuoteEvent, SinkError, StreamController, Symbol, TradeEvent,
};

// =============================================================================
// Fake Upstream
// =============================================================================

#[derive(Default)]
struct CategoryFeed {
    sessions_opened: usize,
    subscribe_calls: Vec<Vec<Symbol>>,
    subscribed: HashSet<Symbol>,
    queued: Vec<MarketEvent>,
    reject_subscribes: usize,
    connection_lost: bool,
}

/// In-memory upstream shared by every session it opens.
///
/// Events published for a category are delivered to that category's session
/// on its next poll, filtered to the symbols the session subscribed.
#[derive(Default)]
pub struct FakeUpstream {
    feeds: Mutex<HashMap<Category, CategoryFeed>>,
}

impl FakeUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_feed<R>(&self, category: Category, f: impl FnOnce(&mut CategoryFeed) -> R) -> R {
        let mut feeds = self.feeds.lock();
        f(feeds.entry(category).or_default())
    }

    /// Queue an event for delivery.
    pub fn publish(&self, event: MarketEvent) {
        self.with_feed(event.category(), |feed| feed.queued.push(event));
    }

    /// Reject the next `count` subscribe calls with `SubscribeFailed`.
    pub fn reject_subscribes(&self, category: Category, count: usize) {
        self.with_feed(category, |feed| feed.reject_subscribes = count);
    }

    /// Drop the category's connection: every later call fails.
    pub fn lose_connection(&self, category: Category) {
        self.with_feed(category, |feed| feed.connection_lost = true);
    }

    pub fn sessions_opened(&self, category: Category) -> usize {
        self.with_feed(category, |feed| feed.sessions_opened)
    }

    pub fn total_sessions_opened(&self) -> usize {
        Category::all()
            .iter()
            .map(|c| self.sessions_opened(*c))
            .sum()
    }

    /// Symbols acknowledged by the current session of `category`.
    pub fn subscribed(&self, category: Category) -> HashSet<Symbol> {
        self.with_feed(category, |feed| feed.subscribed.clone())
    }

    /// Every successful subscribe call, in order.
    pub fn subscribe_calls(&self, category: Category) -> Vec<Vec<Symbol>> {
        self.with_feed(category, |feed| feed.subscribe_calls.clone())
    }
}

/// Feed provider opening sessions against a shared `FakeUpstream`.
pub struct FakeProvider(pub Arc<FakeUpstream>);

#[async_trait]
impl FeedProvider for FakeProvider {
    async fn open_session(&self, category: Category) -> Result<Box<dyn FeedHandle>, FeedError> {
        self.0.with_feed(category, |feed| {
            feed.sessions_opened += 1;
            feed.subscribed.clear();
        });
        Ok(Box::new(FakeHandle {
            upstream: Arc::clone(&self.0),
            category,
        }))
    }
}

struct FakeHandle {
    upstream: Arc<FakeUpstream>,
    category: Category,
}

#[async_trait]
impl FeedHandle for FakeHandle {
    async fn subscribe(&mut self, symbols: &[Symbol]) -> Result<(), FeedError> {
        self.upstream.with_feed(self.category, |feed| {
            if feed.connection_lost {
                return Err(FeedError::ConnectionLost("socket closed".to_string()));
            }
            if feed.reject_subscribes > 0 {
                feed.reject_subscribes -= 1;
                return Err(FeedError::SubscribeFailed("rate limited".to_string()));
            }
            feed.subscribe_calls.push(symbols.to_vec());
            feed.subscribed.extend(symbols.iter().cloned());
            Ok(())
        })
    }

    async fn poll_events(&mut self) -> Result<Vec<MarketEvent>, FeedError> {
        self.upstream.with_feed(self.category, |feed| {
            if feed.connection_lost {
                return Err(FeedError::ConnectionLost("socket closed".to_string()));
            }
            let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut feed.queued)
                .into_iter()
                .partition(|e| feed.subscribed.contains(e.symbol()));
            feed.queued = waiting;
            Ok(ready)
        })
    }

    async fn close(&mut self) {}
}

// =============================================================================
// Recording Sink
// =============================================================================

/// Sink that records every batch it receives.
#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<(Category, Vec<MarketEvent>)>>,
}

impl RecordingSink {
    pub fn batches(&self) -> Vec<(Category, Vec<MarketEvent>)> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn persist(&self, category: Category, events: &[MarketEvent]) -> Result<(), SinkError> {
        self.batches.lock().push((category, events.to_vec()));
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        poll_interval: POLL_INTERVAL,
        shutdown_grace: Duration::from_secs(2),
    }
}

pub fn controller(upstream: &Arc<FakeUpstream>) -> StreamController {
    StreamController::new(test_config(), Arc::new(FakeProvider(Arc::clone(upstream))))
}

/// Poll `condition` until it holds, panicking after `WAIT_TIMEOUT`.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(WAIT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

pub fn quote(symbol: &str, bid: i64, ask: i64) -> MarketEvent {
    QuoteEvent {
        symbol: symbol.to_string(),
        bid_price: Decimal::new(bid, 2),
        bid_size: Decimal::from(100),
        ask_price: Decimal::new(ask, 2),
        ask_size: Decimal::from(200),
        bid_exchange: None,
        ask_exchange: None,
        timestamp: Utc::now(),
    }
    .into()
}

pub fn trade(symbol: &str, price: i64) -> MarketEvent {
    TradeEvent {
        symbol: symbol.to_string(),
        price: Decimal::new(price, 2),
        size: Decimal::from(10),
        day_volume: None,
        exchange: None,
        timestamp: Utc::now(),
    }
    .into()
}
