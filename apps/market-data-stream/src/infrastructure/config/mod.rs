//! Configuration Module
//!
//! Environment-driven configuration for the stream service.

mod settings;

pub use settings::{ConfigError, ServerSettings, SessionSettings, SimulatedSettings, StreamConfig};
