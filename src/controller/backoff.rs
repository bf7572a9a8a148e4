//! # Fibonacci Backoff
//!
//! Provides a Fibonacci-based backoff between retry attempts.
//! The delay grows more slowly than exponential backoff, which suits waiting for
//! a controller that is still starting: early attempts stay frequent, later ones
//! back off without overshooting the retry budget by much.
//!
//! ## Usage
//!
//! ```rust
//! use sealedsecret_git::controller::backoff::FibonacciBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = FibonacciBackoff::new(Duration::from_millis(500), Duration::from_secs(10));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(1000));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(1500));
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, starting from `min` and capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    prev: Duration,
    current: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with the given bounds
    ///
    /// A `min` greater than `max` is clamped to `max`.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            prev: Duration::ZERO,
            current: min.min(max),
            max,
        }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;

        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = next.min(self.max);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(ms(100), ms(1000));

        assert_eq!(backoff.next_backoff(), ms(100));
        assert_eq!(backoff.next_backoff(), ms(100));
        assert_eq!(backoff.next_backoff(), ms(200));
        assert_eq!(backoff.next_backoff(), ms(300));
        assert_eq!(backoff.next_backoff(), ms(500));
        assert_eq!(backoff.next_backoff(), ms(800));
        assert_eq!(backoff.next_backoff(), ms(1000));
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(ms(100), ms(250));

        assert_eq!(backoff.next_backoff(), ms(100));
        assert_eq!(backoff.next_backoff(), ms(100));
        assert_eq!(backoff.next_backoff(), ms(200));
        assert_eq!(backoff.next_backoff(), ms(250));
        // Should stay at max
        assert_eq!(backoff.next_backoff(), ms(250));
        assert_eq!(backoff.next_backoff(), ms(250));
    }

    #[test]
    fn test_min_clamped_to_max() {
        let mut backoff = FibonacciBackoff::new(ms(5000), ms(100));
        assert_eq!(backoff.next_backoff(), ms(100));
        assert_eq!(backoff.next_backoff(), ms(100));
    }
}
