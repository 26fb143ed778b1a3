//! Latest-Event Cache
//!
//! Keeps the most recent market event per (category, symbol). Older events
//! for the same key are overwritten, never accumulated, so memory is bounded
//! by the number of distinct symbols the feed has delivered.
//!
//! # Ordering
//!
//! Events are applied in the order they are `put`. The cache does not
//! compare timestamps: an out-of-order event from the feed replaces a newer
//! one.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::streaming::{Category, MarketEvent, Symbol};

/// Latest-value store for market events.
///
/// One lock per category keeps writers for one category from stalling
/// readers of another.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use market_data_stream::domain::cache::EventCache;
/// use market_data_stream::domain::streaming::{Category, MarketEvent, TradeEvent};
/// use rust_decimal::Decimal;
///
/// let cache = EventCache::new();
/// cache.put(MarketEvent::Trade(TradeEvent {
///     symbol: "/MESU4".to_string(),
///     price: Decimal::new(550_025, 2),
///     size: Decimal::ONE,
///     day_volume: None,
///     exchange: None,
///     timestamp: Utc::now(),
/// }));
///
/// assert_eq!(cache.get(Category::Trade, &["/MESU4"]).len(), 1);
/// assert!(cache.get(Category::Quote, &["/MESU4"]).is_empty());
/// ```
#[derive(Debug, Default)]
pub struct EventCache {
    greeks: RwLock<HashMap<Symbol, MarketEvent>>,
    trades: RwLock<HashMap<Symbol, MarketEvent>>,
    quotes: RwLock<HashMap<Symbol, MarketEvent>>,
}

impl EventCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an event, replacing any earlier event for its category and symbol.
    pub fn put(&self, event: MarketEvent) {
        let map = self.get_map(event.category());
        map.write().insert(event.symbol().to_string(), event);
    }

    /// Store a batch of events in order.
    ///
    /// Returns the number of events applied.
    pub fn put_all(&self, events: impl IntoIterator<Item = MarketEvent>) -> usize {
        let mut applied = 0;
        for event in events {
            self.put(event);
            applied += 1;
        }
        applied
    }

    /// Get the cached events for `symbols` in `category`.
    ///
    /// Symbols without a cached event are omitted. Order is unspecified.
    #[must_use]
    pub fn get<S: AsRef<str>>(&self, category: Category, symbols: &[S]) -> Vec<MarketEvent> {
        let wanted: HashSet<&str> = symbols.iter().map(AsRef::as_ref).collect();
        let map = self.get_map(category).read();

        if wanted.len() < map.len() {
            wanted
                .into_iter()
                .filter_map(|symbol| map.get(symbol).cloned())
                .collect()
        } else {
            map.iter()
                .filter(|(symbol, _)| wanted.contains(symbol.as_str()))
                .map(|(_, event)| event.clone())
                .collect()
        }
    }

    /// Get the cached event for a single symbol.
    #[must_use]
    pub fn get_one(&self, category: Category, symbol: &str) -> Option<MarketEvent> {
        self.get_map(category).read().get(symbol).cloned()
    }

    /// Symbols with a cached event in `category`.
    #[must_use]
    pub fn symbols(&self, category: Category) -> Vec<Symbol> {
        self.get_map(category).read().keys().cloned().collect()
    }

    /// Number of cached events in `category`.
    #[must_use]
    pub fn len(&self, category: Category) -> usize {
        self.get_map(category).read().len()
    }

    /// Whether no category holds any event.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Category::all()
            .iter()
            .all(|category| self.get_map(*category).read().is_empty())
    }

    /// Per-category entry counts.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            greeks: self.len(Category::Greeks),
            trades: self.len(Category::Trade),
            quotes: self.len(Category::Quote),
        }
    }

    const fn get_map(&self, category: Category) -> &RwLock<HashMap<Symbol, MarketEvent>> {
        match category {
            Category::Greeks => &self.greeks,
            Category::Trade => &self.trades,
            Category::Quote => &self.quotes,
        }
    }
}

/// Cached entry counts by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Cached greeks events.
    pub greeks: usize,
    /// Cached trade events.
    pub trades: usize,
    /// Cached quote events.
    pub quotes: usize,
}

impl CacheStats {
    /// Total cached events across categories.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.greeks + self.trades + self.quotes
    }
}

// =============================================================================
// Tests
// =============================================================================
