#![expect(
    clippy::module_name_repetitions,
    reason = "The backoff type is named for the policy it implements"
)]

use std::time::Duration;

use backoff::backoff::Backoff;

use super::config::ReconnectConfig;

/// Deterministic exponential backoff with an attempt ceiling.
///
/// Each call to [`Backoff::next_backoff`] charges one reconnection attempt and
/// returns its delay, or `None` once `max_attempts` have been charged since the
/// last [`Backoff::reset`].
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectBackoff {
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Attempts charged since the last successful connection.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.config.max_attempts
    }
}

impl Backoff for ReconnectBackoff {
    fn reset(&mut self) {
        self.attempts = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let delay = self.config.delay_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_five_doubling_delays_then_stops() {
        let mut backoff = ReconnectBackoff::new(ReconnectConfig::default());

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_backoff()).collect();

        assert_eq!(
            delays,
            [1_000, 2_000, 4_000, 8_000, 16_000].map(Duration::from_millis),
            "nth retry should wait min(1000 * 2^(n-1), 30000) ms"
        );
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_backoff(), None);
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut backoff = ReconnectBackoff::new(ReconnectConfig::default());

        backoff.next_backoff();
        backoff.next_backoff();
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn cap_applies_with_many_attempts() {
        let config = ReconnectConfig::builder().max_attempts(10).build();
        let mut backoff = ReconnectBackoff::new(config);

        let last = std::iter::from_fn(|| backoff.next_backoff()).last();
        assert_eq!(last, Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_max_attempts_never_retries() {
        let config = ReconnectConfig::builder().max_attempts(0).build();
        let mut backoff = ReconnectBackoff::new(config);

        assert_eq!(backoff.next_backoff(), None);
    }
}
