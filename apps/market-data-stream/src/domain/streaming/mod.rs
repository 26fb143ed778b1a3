//! Market Data Streaming Types
//!
//! Core domain types for market data: the event categories served by the
//! stream and the latest-value events cached per streamer symbol. These
//! types are feed-agnostic and represent the canonical internal form of
//! an upstream event.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// A streamer symbol (the upstream feed's identifier for an instrument).
///
/// Compared by exact string equality; no normalization is applied.
pub type Symbol = String;

/// Kind of market event. Partitions both the cache and the subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    /// Option greeks.
    Greeks,
    /// Last trade.
    Trade,
    /// Top-of-book quote.
    Quote,
}

impl Category {
    /// Get all categories.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Greeks, Self::Trade, Self::Quote]
    }

    /// Get the category name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Greeks => "greeks",
            Self::Trade => "trade",
            Self::Quote => "quote",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = InvalidCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "greeks" => Ok(Self::Greeks),
            "trade" | "trades" => Ok(Self::Trade),
            "quote" | "quotes" => Ok(Self::Quote),
            _ => Err(InvalidCategory(s.to_string())),
        }
    }
}

/// A category name that is not one of GREEKS, TRADE or QUOTE.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid market data category: {0:?}")]
pub struct InvalidCategory(pub String);

// =============================================================================
// Event Payloads
// =============================================================================

/// Top-of-book quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteEvent {
    /// Streamer symbol.
    pub symbol: Symbol,
    /// Bid price.
    pub bid_price: Decimal,
    /// Bid size.
    pub bid_size: Decimal,
    /// Ask price.
    pub ask_price: Decimal,
    /// Ask size.
    pub ask_size: Decimal,
    /// Bid exchange code, when the feed reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_exchange: Option<String>,
    /// Ask exchange code, when the feed reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_exchange: Option<String>,
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

impl QuoteEvent {
    /// Mid price, or `None` when either side is empty.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        if self.bid_price.is_zero() || self.ask_price.is_zero() {
            return None;
        }
        Some((self.bid_price + self.ask_price) / Decimal::TWO)
    }
}

/// Last trade print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Streamer symbol.
    pub symbol: Symbol,
    /// Trade price.
    pub price: Decimal,
    /// Trade size.
    pub size: Decimal,
    /// Cumulative day volume, when the feed reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_volume: Option<Decimal>,
    /// Exchange code, when the feed reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

/// Option greeks as published by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreeksEvent {
    /// Streamer symbol (option leg).
    pub symbol: Symbol,
    /// Theoretical option price.
    pub price: Decimal,
    /// Implied volatility.
    pub volatility: Decimal,
    /// Delta.
    pub delta: Decimal,
    /// Gamma.
    pub gamma: Decimal,
    /// Theta.
    pub theta: Decimal,
    /// Rho.
    pub rho: Decimal,
    /// Vega.
    pub vega: Decimal,
    /// Event time.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Market Event
// =============================================================================

/// A category-tagged market event keyed by streamer symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "UPPERCASE")]
pub enum MarketEvent {
    /// Greeks update.
    Greeks(GreeksEvent),
    /// Trade print.
    Trade(TradeEvent),
    /// Quote update.
    Quote(QuoteEvent),
}

impl MarketEvent {
    /// The category this event belongs to.
    #[must_use]
    pub const fn category(&self) -> Category {
        match self {
            Self::Greeks(_) => Category::Greeks,
            Self::Trade(_) => Category::Trade,
            Self::Quote(_) => Category::Quote,
        }
    }

    /// The streamer symbol this event is keyed by.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Greeks(e) => &e.symbol,
            Self::Trade(e) => &e.symbol,
            Self::Quote(e) => &e.symbol,
        }
    }

    /// The event time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Greeks(e) => e.timestamp,
            Self::Trade(e) => e.timestamp,
            Self::Quote(e) => e.timestamp,
        }
    }
}

impl From<QuoteEvent> for MarketEvent {
    fn from(event: QuoteEvent) -> Self {
        Self::Quote(event)
    }
}

impl From<TradeEvent> for MarketEvent {
    fn from(event: TradeEvent) -> Self {
        Self::Trade(event)
    }
}

impl From<GreeksEvent> for MarketEvent {
    fn from(event: GreeksEvent) -> Self {
        Self::Greeks(event)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(symbol: &str, bid: i64, ask: i64) -> QuoteEvent {
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
    }

    #[test]
    fn category_parsing() {
        assert_eq!("greeks".parse::<Category>(), Ok(Category::Greeks));
        assert_eq!("GREEKS".parse::<Category>(), Ok(Category::Greeks));
        assert_eq!("Trade".parse::<Category>(), Ok(Category::Trade));
        assert_eq!("quotes".parse::<Category>(), Ok(Category::Quote));
        assert_eq!(" quote ".parse::<Category>(), Ok(Category::Quote));
    }

    #[test]
    fn category_parsing_rejects_unknown() {
        let err = "candle".parse::<Category>().unwrap_err();
        assert_eq!(err, InvalidCategory("candle".to_string()));
        assert!(err.to_string().contains("candle"));
    }

    #[test]
    fn category_all_returns_all_categories() {
        let all = Category::all();
        assert_eq!(all.len(), 3);
        assert!(all.contains(&Category::Greeks));
        assert!(all.contains(&Category::Trade));
        assert!(all.contains(&Category::Quote));
    }

    #[test]
    fn category_display_round_trips_through_parse() {
        for category in Category::all() {
            assert_eq!(category.to_string().parse::<Category>(), Ok(*category));
        }
    }

    #[test]
    fn market_event_accessors() {
        let event = MarketEvent::from(quote("IBM", 15000, 15005));
        assert_eq!(event.category(), Category::Quote);
        assert_eq!(event.symbol(), "IBM");
    }

    #[test]
    fn mid_price_requires_both_sides() {
        assert_eq!(
            quote("IBM", 15000, 15010).mid_price(),
            Some(Decimal::new(15005, 2))
        );
        assert_eq!(quote("IBM", 0, 15010).mid_price(), None);
    }

    #[test]
    fn market_event_serializes_with_category_tag() {
        let event = MarketEvent::from(quote("IBM", 15000, 15005));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "QUOTE");
        assert_eq!(json["symbol"], "IBM");
        assert!(json.get("bid_exchange").is_none());
    }
}
