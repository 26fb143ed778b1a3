//! Stream Configuration Settings
//!
//! Configuration types for the market data stream, loaded from environment
//! variables.

use std::time::Duration;

/// Feed session timing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Sleep between poll cycles of each feed session.
    pub poll_interval: Duration,
    /// How long `stop()` waits for sessions before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Simulated feed provider settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedSettings {
    /// Events generated per subscribed symbol on each poll.
    pub events_per_poll: usize,
}

impl Default for SimulatedSettings {
    fn default() -> Self {
        Self { events_per_poll: 4 }
    }
}

/// Complete stream configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConfig {
    /// Feed session timing.
    pub session: SessionSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Simulated provider settings.
    pub simulated: SimulatedSettings,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// Unset or unparseable variables fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds a value the stream cannot run
    /// with, such as a zero poll interval.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let session = SessionSettings {
            poll_interval: parse_env_duration_millis(
                &lookup,
                "STREAM_POLL_INTERVAL_MS",
                defaults.session.poll_interval,
            ),
            shutdown_grace: parse_env_duration_secs(
                &lookup,
                "STREAM_SHUTDOWN_GRACE_SECS",
                defaults.session.shutdown_grace,
            ),
        };

        if session.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "STREAM_POLL_INTERVAL_MS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let server = ServerSettings {
            health_port: parse_env_u16(
                &lookup,
                "STREAM_HEALTH_PORT",
                defaults.server.health_port,
            ),
        };

        let simulated = SimulatedSettings {
            events_per_poll: parse_env_usize(
                &lookup,
                "STREAM_SIMULATED_EVENTS_PER_POLL",
                defaults.simulated.events_per_poll,
            ),
        };

        Ok(Self {
            session,
            server,
            simulated,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable holds an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn parse_env_u16<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
