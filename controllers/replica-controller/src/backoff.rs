//! # Fibonacci Backoff
//!
//! Progressive retry delays that grow more slowly than exponential backoff.
//! The sequence is `min, min, 2*min, 3*min, 5*min, ...` capped at `max`.
//!
//! The work queue uses the stateless form keyed by an item's failure count;
//! the watch bridge keeps a stateful instance across stream errors.

use std::time::Duration;

/// Fibonacci backoff calculator
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min: Duration,
    prev: Duration,
    current: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    /// Backoff starting at `min` and capped at `max`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            prev: Duration::ZERO,
            current: min.min(max),
            max,
        }
    }

    /// Current delay; advances the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = next.min(self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.min.min(self.max);
    }

    /// Delay after `failures` consecutive failures (stateless)
    ///
    /// Failure counts 0 and 1 both map to `min`.
    #[must_use]
    pub fn for_failures(failures: u32, min: Duration, max: Duration) -> Duration {
        let mut backoff = Self::new(min, max);
        let mut delay = backoff.next_backoff();
        for _ in 1..failures {
            delay = backoff.next_backoff();
            if delay >= max {
                break;
            }
        }
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(SECOND, SECOND * 10);
        let sequence: Vec<u64> = (0..8).map(|_| backoff.next_backoff().as_secs()).collect();
        assert_eq!(sequence, vec![1, 1, 2, 3, 5, 8, 10, 10]);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(SECOND, SECOND * 10);
        backoff.next_backoff();
        backoff.next_backoff();
        assert_eq!(backoff.next_backoff(), SECOND * 2);

        backoff.reset();

        assert_eq!(backoff.next_backoff(), SECOND);
        assert_eq!(backoff.next_backoff(), SECOND);
        assert_eq!(backoff.next_backoff(), SECOND * 2);
    }

    #[test]
    fn test_for_failures_matches_sequence() {
        let min = Duration::from_millis(5);
        let max = Duration::from_millis(1000);
        assert_eq!(FibonacciBackoff::for_failures(0, min, max), min);
        assert_eq!(FibonacciBackoff::for_failures(1, min, max), min);
        assert_eq!(FibonacciBackoff::for_failures(2, min, max), min);
        assert_eq!(FibonacciBackoff::for_failures(3, min, max), min * 2);
        assert_eq!(FibonacciBackoff::for_failures(6, min, max), min * 8);
        assert_eq!(FibonacciBackoff::for_failures(100, min, max), max);
    }
}
