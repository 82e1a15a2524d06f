//! Reconnection strategies
//!
//! When the subscription socket drops (or the first connect fails), the
//! connection controller asks the strategy how long to wait before the next
//! attempt, and whether to keep trying at all.
//!
//! # Built-in Strategies
//!
//! - **ExponentialBackoff**: doubling delays with ±50% jitter (default)
//! - **FixedDelay**: constant delay between attempts
//! - **NoReconnect**: fail on the first error
//!
//! # Attempt numbering
//!
//! `attempt` counts failed connection attempts since the last success,
//! starting at 0. A strategy with `max_attempts = 10` therefore allows one
//! initial try plus ten retries before the controller gives up.
//!
//! # Examples
//!
//! ```rust
//! use evmux_client::{ExponentialBackoff, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! // Default: 1s doubling up to 30s, 10 retries, jittered
//! let default = ExponentialBackoff::default();
//!
//! // Deterministic delays for a test harness
//! let mut strict = ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(80))
//!     .with_max_attempts(3)
//!     .without_jitter();
//! assert_eq!(strict.next_delay(2), Some(Duration::from_millis(40)));
//! assert_eq!(strict.next_delay(3), None);
//! ```

use rand::Rng;
use std::time::Duration;

/// Decides the delay before each reconnection attempt
///
/// The controller calls `next_delay` after every failed attempt and `reset`
/// after a successful connect.
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before retrying after `attempt + 1` consecutive failures, or
    /// `None` to give up
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Forget accumulated state after a successful connection
    fn reset(&mut self) {}
}

/// Exponential backoff with ±50% jitter
///
/// The un-jittered delay is `base * 2^attempt`, capped at `max_delay`. The
/// cap applies before jitter, so a jittered delay can reach 1.5x the cap.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
}

impl ExponentialBackoff {
    /// Unbounded, jittered backoff between `base_delay` and `max_delay`
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts: None,
            jitter: true,
        }
    }

    /// Give up after `max_attempts` retries
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Use the exact computed delays
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Un-jittered delay for an attempt
    fn capped_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30)).with_max_attempts(10)
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }

        let delay = self.capped_delay(attempt);
        if !self.jitter {
            return Some(delay);
        }

        let factor = rand::thread_rng().gen_range(0.5..=1.5);
        Some(Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX))
    }
}

/// Same delay before every attempt
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    /// Retry forever after `delay`
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Give up after `max_attempts` retries
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }
}

/// Never reconnect; the first connection failure is terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectionStrategy for NoReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles() {
        let mut strategy =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10))
                .with_max_attempts(5)
                .without_jitter();

        assert_eq!(strategy.next_delay(0).unwrap(), Duration::from_millis(100));
        assert_eq!(strategy.next_delay(1).unwrap(), Duration::from_millis(200));
        assert_eq!(strategy.next_delay(2).unwrap(), Duration::from_millis(400));
    }

    #[test]
    fn test_exponential_backoff_max_delay() {
        let mut strategy =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1))
                .without_jitter();

        assert_eq!(strategy.next_delay(10).unwrap(), Duration::from_secs(1));
        // Exponent overflow saturates to the cap
        assert_eq!(strategy.next_delay(200).unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_backoff_max_attempts() {
        let mut strategy =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10))
                .with_max_attempts(3);

        assert!(strategy.next_delay(0).is_some());
        assert!(strategy.next_delay(1).is_some());
        assert!(strategy.next_delay(2).is_some());
        assert!(strategy.next_delay(3).is_none());
    }

    #[test]
    fn test_exponential_backoff_jitter_bounds() {
        let mut strategy =
            ExponentialBackoff::new(Duration::from_millis(1000), Duration::from_secs(4));

        for attempt in 0..6 {
            let capped = strategy.capped_delay(attempt);
            let delay = strategy.next_delay(attempt).unwrap();
            assert!(delay >= capped / 2, "{delay:?} below half of {capped:?}");
            assert!(delay <= capped.mul_f64(1.5), "{delay:?} above 1.5x {capped:?}");
        }
    }

    #[test]
    fn test_default_backoff() {
        let mut strategy = ExponentialBackoff::default();
        assert_eq!(strategy.capped_delay(0), Duration::from_secs(1));
        assert_eq!(strategy.capped_delay(5), Duration::from_secs(30));
        assert!(strategy.next_delay(9).is_some());
        assert!(strategy.next_delay(10).is_none());
    }

    #[test]
    fn test_jittered_delay_saturates() {
        let mut strategy = ExponentialBackoff::new(Duration::MAX / 2, Duration::MAX);

        for attempt in [0, 1, 2, 64, 200] {
            let delay = strategy.next_delay(attempt).unwrap();
            assert!(delay >= Duration::from_secs(u64::MAX / 8), "{delay:?}");
        }
    }

    #[test]
    fn test_fixed_delay() {
        let mut strategy = FixedDelay::new(Duration::from_secs(1)).with_max_attempts(3);

        assert_eq!(strategy.next_delay(0).unwrap(), Duration::from_secs(1));
        assert_eq!(strategy.next_delay(2).unwrap(), Duration::from_secs(1));
        assert!(strategy.next_delay(3).is_none());
    }

    #[test]
    fn test_no_reconnect() {
        let mut strategy = NoReconnect;
        assert!(strategy.next_delay(0).is_none());
        assert!(strategy.next_delay(1).is_none());
    }
}
