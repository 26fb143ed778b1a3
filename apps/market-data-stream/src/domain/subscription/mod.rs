//! Subscription Tracking
//!
//! Domain types for tracking which symbols the upstream feed streams for
//! each category, and which were requested since the last forward cycle.
//!
//! # Design
//!
//! Each category keeps two sets behind one lock:
//! - `subscribed`: every symbol ever requested (the upstream stream set)
//! - `pending`: symbols added since the feed session last drained
//!
//! A duplicate request for an already-subscribed symbol is a no-op, so the
//! upstream feed is asked for each symbol exactly once per session. Draining
//! swaps `pending` for an empty set under the same lock that guards
//! requests, which makes the hand-off lossless.

use std::collections::HashSet;

use parking_lot::Mutex;

use super::streaming::{Category, Symbol};

// =============================================================================
// Subscription State (per category)
// =============================================================================

/// Tracks subscriptions for a single category.
#[derive(Debug, Default)]
struct CategorySubscriptionState {
    /// Symbols the upstream feed streams (or will once forwarded).
    subscribed: HashSet<Symbol>,
    /// Symbols requested but not yet forwarded upstream.
    pending: HashSet<Symbol>,
}

impl CategorySubscriptionState {
    /// Record requested symbols.
    ///
    /// Returns symbols that were not subscribed before.
    fn add<S: AsRef<str>>(&mut self, symbols: &[S]) -> HashSet<Symbol> {
        let mut added = HashSet::new();

        for symbol in symbols {
            let symbol = symbol.as_ref();
            if self.subscribed.contains(symbol) {
                continue;
            }

            self.subscribed.insert(symbol.to_string());
            self.pending.insert(symbol.to_string());
            added.insert(symbol.to_string());
        }

        added
    }

    fn drain(&mut self) -> HashSet<Symbol> {
        std::mem::take(&mut self.pending)
    }

    /// Put symbols back into `pending` after a failed forward.
    ///
    /// Symbols that were never subscribed are ignored.
    fn requeue(&mut self, symbols: impl IntoIterator<Item = Symbol>) -> usize {
        let mut requeued = 0;
        for symbol in symbols {
            if self.subscribed.contains(&symbol) && self.pending.insert(symbol) {
                requeued += 1;
            }
        }
        requeued
    }

    fn resync(&mut self) -> HashSet<Symbol> {
        self.pending.clear();
        self.subscribed.clone()
    }
}

// =============================================================================
// Subscription Set
// =============================================================================

/// Per-category subscription bookkeeping shared by callers and feed sessions.
///
/// # Example
///
/// ```rust
/// use market_data_stream::domain::streaming::Category;
/// use market_data_stream::domain::subscription::SubscriptionSet;
///
/// let subscriptions = SubscriptionSet::new();
///
/// // First request - AAPL needs forwarding upstream
/// let added = subscriptions.request_subscribe(Category::Quote, &["AAPL"]);
/// assert!(added.contains("AAPL"));
///
/// // Duplicate request - nothing new
/// let added = subscriptions.request_subscribe(Category::Quote, &["AAPL"]);
/// assert!(added.is_empty());
///
/// // The feed session takes the pending work exactly once
/// assert_eq!(subscriptions.drain_pending(Category::Quote).len(), 1);
/// assert!(subscriptions.drain_pending(Category::Quote).is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    greeks: Mutex<CategorySubscriptionState>,
    trades: Mutex<CategorySubscriptionState>,
    quotes: Mutex<CategorySubscriptionState>,
}

impl SubscriptionSet {
    /// Create an empty subscription set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription request.
    ///
    /// Returns the newly added symbols: those not already subscribed in
    /// `category`. They are queued as pending for the feed session.
    pub fn request_subscribe<S: AsRef<str>>(
        &self,
        category: Category,
        symbols: &[S],
    ) -> HashSet<Symbol> {
        self.get_state(category).lock().add(symbols)
    }

    /// Take and clear the pending symbols for `category`.
    pub fn drain_pending(&self, category: Category) -> HashSet<Symbol> {
        self.get_state(category).lock().drain()
    }

    /// Return symbols to `pending` after an upstream subscribe failed.
    ///
    /// Returns how many symbols were requeued.
    pub fn requeue(&self, category: Category, symbols: impl IntoIterator<Item = Symbol>) -> usize {
        self.get_state(category).lock().requeue(symbols)
    }

    /// Clear `pending` and return every subscribed symbol.
    ///
    /// Used when a fresh upstream session opens and needs the full set.
    pub fn resync(&self, category: Category) -> HashSet<Symbol> {
        self.get_state(category).lock().resync()
    }

    /// Get all subscribed symbols for `category`.
    #[must_use]
    pub fn subscribed(&self, category: Category) -> HashSet<Symbol> {
        self.get_state(category).lock().subscribed.clone()
    }

    /// Get the symbols waiting to be forwarded for `category`.
    #[must_use]
    pub fn pending(&self, category: Category) -> HashSet<Symbol> {
        self.get_state(category).lock().pending.clone()
    }

    /// Whether `symbol` is subscribed in `category`.
    #[must_use]
    pub fn is_subscribed(&self, category: Category, symbol: &str) -> bool {
        self.get_state(category).lock().subscribed.contains(symbol)
    }

    /// Get statistics for a category.
    #[must_use]
    pub fn stats(&self, category: Category) -> SubscriptionStats {
        let state = self.get_state(category).lock();
        SubscriptionStats {
            subscribed_count: state.subscribed.len(),
            pending_count: state.pending.len(),
        }
    }

    /// Get overall statistics.
    #[must_use]
    pub fn total_stats(&self) -> TotalSubscriptionStats {
        TotalSubscriptionStats {
            greeks: self.stats(Category::Greeks),
            trades: self.stats(Category::Trade),
            quotes: self.stats(Category::Quote),
        }
    }

    const fn get_state(&self, category: Category) -> &Mutex<CategorySubscriptionState> {
        match category {
            Category::Greeks => &self.greeks,
            Category::Trade => &self.trades,
            Category::Quote => &self.quotes,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for a single category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SubscriptionStats {
    /// Number of subscribed symbols.
    pub subscribed_count: usize,
    /// Number of symbols awaiting forwarding.
    pub pending_count: usize,
}

/// Overall subscription statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct TotalSubscriptionStats {
    /// Greeks subscription stats.
    pub greeks: SubscriptionStats,
    /// Trade subscription stats.
    pub trades: SubscriptionStats,
    /// Quote subscription stats.
    pub quotes: SubscriptionStats,
}

// =============================================================================
// Tests
// =============================================================================
