#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use bon::Builder;

use crate::Result;
use crate::error::Error;

const DEFAULT_HISTORY_CAPACITY: usize = 1000;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;
const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_HEARTBEAT_TIMEOUT_DURATION: Duration = Duration::from_secs(15);

/// Configuration for WebSocket client behavior.
///
/// ```
/// use debate_ws_client::ws::config::{Config, ReconnectConfig};
///
/// let config = Config::builder()
///     .history_capacity(250)
///     .reconnect(ReconnectConfig::builder().max_attempts(3).build())
///     .build();
/// assert_eq!(config.history_capacity, 250);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
    /// Number of parsed messages retained in the history buffer
    #[builder(default = DEFAULT_HISTORY_CAPACITY)]
    pub history_capacity: usize,
    /// Protocol level PING/PONG monitoring. Disabled when `None`.
    pub heartbeat: Option<HeartbeatConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            heartbeat: None,
        }
    }
}

impl Config {
    /// Reject configurations the connection manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            return Err(Error::validation("history capacity must be at least 1"));
        }

        self.reconnect.validate()?;

        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.validate()?;
        }

        Ok(())
    }
}

/// Configuration for automatic reconnection behavior.
///
/// The delay before the retry with zero-based index `n` is
/// `min(initial_backoff * backoff_multiplier^n, max_backoff)`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct ReconnectConfig {
    /// Maximum number of automatic reconnection attempts before giving up
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    /// Backoff duration for the first reconnection attempt
    #[builder(default = DEFAULT_INITIAL_BACKOFF_DURATION)]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[builder(default = DEFAULT_MAX_BACKOFF_DURATION)]
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    #[builder(default = DEFAULT_BACKOFF_MULTIPLIER)]
    pub backoff_multiplier: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the retry with the given zero-based index.
    #[must_use]
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let factor = self.backoff_multiplier.saturating_pow(attempt_index);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn validate(&self) -> Result<()> {
        if self.initial_backoff.is_zero() {
            return Err(Error::validation("initial reconnect backoff must be > 0"));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(Error::validation(
                "max reconnect backoff must be >= initial reconnect backoff",
            ));
        }
        if self.backoff_multiplier == 0 {
            return Err(Error::validation("backoff multiplier must be >= 1"));
        }
        Ok(())
    }
}

/// PING/PONG monitoring for connections that can go silently dead.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct HeartbeatConfig {
    /// Interval for sending PING frames to keep the connection alive
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub interval: Duration,
    /// Maximum time to wait for a PONG before considering the connection dead
    #[builder(default = DEFAULT_HEARTBEAT_TIMEOUT_DURATION)]
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            timeout: DEFAULT_HEARTBEAT_TIMEOUT_DURATION,
        }
    }
}

impl HeartbeatConfig {
    fn validate(self) -> Result<()> {
        if self.interval.is_zero() || self.timeout.is_zero() {
            return Err(Error::validation(
                "heartbeat interval and timeout must be > 0",
            ));
        }
        Ok(())
    }
}
