//! Simulated Feed Provider
//!
//! Offline implementation of the feed ports. Each session random-walks a
//! price per subscribed symbol and emits synthetic events for it on every
//! poll. Used by the binary and for local development without an upstream
//! connection.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::application::ports::{FeedError, FeedHandle, FeedProvider};
use crate::domain::streaming::{
    Category, GreeksEvent, MarketEvent, QuoteEvent, Symbol, TradeEvent,
};

const EXCHANGE: &str = "SIM";

/// Feed provider producing synthetic market data.
#[derive(Debug, Clone)]
pub struct SimulatedFeedProvider {
    events_per_poll: usize,
}

impl SimulatedFeedProvider {
    /// Create a provider emitting `events_per_poll` events per subscribed
    /// symbol on each poll.
    #[must_use]
    pub const fn new(events_per_poll: usize) -> Self {
        Self { events_per_poll }
    }
}

#[async_trait]
impl FeedProvider for SimulatedFeedProvider {
    async fn open_session(&self, category: Category) -> Result<Box<dyn FeedHandle>, FeedError> {
        tracing::debug!(category = %category, "Opening simulated feed session");
        Ok(Box::new(SimulatedHandle::new(
            category,
            self.events_per_poll,
            StdRng::from_os_rng(),
        )))
    }
}

/// Per-symbol random walk state.
#[derive(Debug, Clone, Copy)]
struct Walk {
    /// Price in cents.
    cents: i64,
    day_volume: i64,
}

/// A simulated session for one category.
pub struct SimulatedHandle {
    category: Category,
    events_per_poll: usize,
    symbols: BTreeSet<Symbol>,
    walks: HashMap<Symbol, Walk>,
    rng: StdRng,
    closed: bool,
}

impl SimulatedHandle {
    fn new(category: Category, events_per_poll: usize, rng: StdRng) -> Self {
        Self {
            category,
            events_per_poll,
            symbols: BTreeSet::new(),
            walks: HashMap::new(),
            rng,
            closed: false,
        }
    }

    fn next_event(&mut self, symbol: &str) -> MarketEvent {
        let step = self.rng.random_range(-25..=25);
        let walk = self
            .walks
            .entry(symbol.to_string())
            .or_insert_with(|| Walk {
                cents: starting_cents(symbol),
                day_volume: 0,
            });
        walk.cents = (walk.cents + step).max(1);
        let Walk { cents, .. } = *walk;
        let price = Decimal::new(cents, 2);
        let timestamp = Utc::now();

        match self.category {
            Category::Quote => {
                let spread = Decimal::new(self.rng.random_range(1..=5), 2);
                QuoteEvent {
                    symbol: symbol.to_string(),
                    bid_price: price - spread,
                    bid_size: Decimal::from(self.rng.random_range(1..=50_i64) * 100),
                    ask_price: price + spread,
                    ask_size: Decimal::from(self.rng.random_range(1..=50_i64) * 100),
                    bid_exchange: Some(EXCHANGE.to_string()),
                    ask_exchange: Some(EXCHANGE.to_string()),
                    timestamp,
                }
                .into()
            }
            Category::Trade => {
                let size = self.rng.random_range(1..=500_i64);
                walk_volume(&mut self.walks, symbol, size);
                let day_volume = self.walks.get(symbol).map(|w| Decimal::from(w.day_volume));
                TradeEvent {
                    symbol: symbol.to_string(),
                    price,
                    size: Decimal::from(size),
                    day_volume,
                    exchange: Some(EXCHANGE.to_string()),
                    timestamp,
                }
                .into()
            }
            Category::Greeks => GreeksEvent {
                symbol: symbol.to_string(),
                price,
                volatility: Decimal::new(self.rng.random_range(1_500..=6_000), 4),
                delta: Decimal::new(self.rng.random_range(-1_000..=1_000), 3),
                gamma: Decimal::new(self.rng.random_range(0..=500), 4),
                theta: Decimal::new(self.rng.random_range(-900..=0), 4),
                rho: Decimal::new(self.rng.random_range(-300..=300), 4),
                vega: Decimal::new(self.rng.random_range(0..=2_500), 4),
                timestamp,
            }
            .into(),
        }
    }
}

fn walk_volume(walks: &mut HashMap<Symbol, Walk>, symbol: &str, size: i64) {
    if let Some(walk) = walks.get_mut(symbol) {
        walk.day_volume += size;
    }
}

/// Stable starting price between 20.00 and 419.99 derived from the symbol.
fn starting_cents(symbol: &str) -> i64 {
    let seed = symbol
        .bytes()
        .fold(0_i64, |acc, b| (acc * 31 + i64::from(b)) % 40_000);
    2_000 + seed
}

#[async_trait]
impl FeedHandle for SimulatedHandle {
    async fn subscribe(&mut self, symbols: &[Symbol]) -> Result<(), FeedError> {
        if self.closed {
            return Err(FeedError::ConnectionLost("session closed".to_string()));
        }
        self.symbols.extend(symbols.iter().cloned());
        Ok(())
    }

    async fn poll_events(&mut self) -> Result<Vec<MarketEvent>, FeedError> {
        if self.closed {
            return Err(FeedError::ConnectionLost("session closed".to_string()));
        }

        let symbols: Vec<Symbol> = self.symbols.iter().cloned().collect();
        let mut events = Vec::with_capacity(symbols.len() * self.events_per_poll);
        for _ in 0..self.events_per_poll {
            for symbol in &symbols {
                events.push(self.next_event(symbol));
            }
        }
        Ok(events)
    }

    async fn close(&mut self) {
        self.closed = true;
        self.symbols.clear();
    }
}
