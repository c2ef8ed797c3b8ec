//! Reconnection policies
//!
//! A session consults its policy once per unexpected channel loss. `attempt` is
//! 1 for the first retry after a loss and resets once the session reaches
//! `Ready` again.

use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Decides whether and when a lost channel is reopened
pub trait ReconnectPolicy: Send + fmt::Debug {
    /// Delay before retry number `attempt`, or `None` to give up
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;
}

// ----------------------------------------------------------------------------
// No Reconnect
// ----------------------------------------------------------------------------

/// Never reconnect; a lost channel leaves the session `Failed`
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectPolicy for NoReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }
}

// ----------------------------------------------------------------------------
// Exponential Backoff
// ----------------------------------------------------------------------------

/// Exponential backoff with proportional jitter and a retry cap
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
    /// Fraction of the delay that may be shaved off at random (0.0 – 1.0)
    pub jitter: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_retries: 5,
            jitter: 0.2,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max_delay,
            max_retries,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay for `attempt` before jitter is applied
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }

        let ceiling = self.ceiling(attempt);
        if self.jitter <= 0.0 {
            return Some(ceiling);
        }

        let shave = rand::thread_rng().gen_range(0.0..=self.jitter);
        Some(ceiling.mul_f64(1.0 - shave))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_reconnect() {
        assert_eq!(NoReconnect.next_delay(1), None);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut policy =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(350), 4);

        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(350)));
        assert_eq!(policy.next_delay(4), Some(Duration::from_millis(350)));
        assert_eq!(policy.next_delay(5), None);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut policy = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(8), 10)
            .with_jitter(0.5);

        for attempt in 1..=10 {
            let delay = policy.next_delay(attempt).unwrap();
            let ceiling = policy.ceiling(attempt);
            assert!(delay <= ceiling);
            assert!(delay >= ceiling.mul_f64(0.5));
        }
    }

    #[test]
    fn test_large_attempts_do_not_overflow() {
        let policy = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60), 100);
        assert_eq!(policy.ceiling(64), Duration::from_secs(60));
    }
}
