//! Adaptive sleep between crawl cycles.

use std::time::Duration;

use crate::config::WatchConfig;

/// Doubles the sleep on a stalled cycle, halves it on progress, clamped to
/// `[min, max]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    interval: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, min: Duration, max: Duration) -> Self {
        Self {
            interval: initial.clamp(min, max),
            min,
            max,
        }
    }

    /// Assumes a validated config (`min <= max`).
    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(config.sleep_interval, config.min_sleep, config.max_sleep)
    }

    pub fn current(&self) -> Duration {
        self.interval
    }

    /// The window could not advance.
    pub fn stalled(&mut self) -> Duration {
        self.interval = self.interval.saturating_mul(2).min(self.max);
        self.interval
    }

    /// The window advanced.
    pub fn progressed(&mut self) -> Duration {
        self.interval = (self.interval / 2).max(self.min);
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(
            Duration::from_secs(1),
            Duration::from_millis(100),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn doubles_and_halves() {
        let mut backoff = backoff();
        assert_eq!(backoff.stalled(), Duration::from_secs(2));
        assert_eq!(backoff.stalled(), Duration::from_secs(4));
        assert_eq!(backoff.progressed(), Duration::from_secs(2));
        assert_eq!(backoff.progressed(), Duration::from_secs(1));
        assert_eq!(backoff.progressed(), Duration::from_millis(500));
    }

    #[test]
    fn clamps_to_bounds() {
        let mut backoff = backoff();
        for _ in 0..20 {
            backoff.stalled();
        }
        assert_eq!(backoff.current(), Duration::from_secs(60));

        for _ in 0..40 {
            backoff.progressed();
        }
        assert_eq!(backoff.current(), Duration::from_millis(100));
    }

    #[test]
    fn initial_interval_is_clamped() {
        let backoff = Backoff::new(
            Duration::from_secs(600),
            Duration::from_millis(100),
            Duration::from_secs(60),
        );
        assert_eq!(backoff.current(), Duration::from_secs(60));
    }
}
