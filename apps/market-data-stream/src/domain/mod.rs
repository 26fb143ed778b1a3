//! Domain Layer - Core market data types and in-memory state.
//!
//! This layer contains the event types, the latest-event cache and the
//! subscription bookkeeping. Nothing here performs I/O.

/// Market data event types (quotes, trades, greeks).
pub mod streaming;

/// Latest-event cache keyed by category and symbol.
pub mod cache;

/// Subscription tracking and pending hand-off.
pub mod subscription;
