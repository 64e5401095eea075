//! Capped Fibonacci backoff generator.
//!
//! Produces an unbounded sequence of wait durations following Fibonacci
//! growth (1, 1, 2, 3, 5, 8, ... base units), each clamped to a
//! caller-supplied cap. Once a value is clamped, every subsequent value
//! equals the cap.

use std::time::Duration;

/// Default base unit for one Fibonacci step (one minute).
const DEFAULT_BASE: Duration = Duration::from_secs(60);

/// Iterator over capped Fibonacci-growth wait durations.
///
/// The sequence restarts from the beginning whenever a fresh iterator is
/// constructed, which is how callers reset backoff after a success.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    prev: u64,
    curr: u64,
    base: Duration,
    cap: Duration,
}

impl FibonacciBackoff {
    /// Create a backoff sequence with the default one-minute base unit.
    pub const fn new(cap: Duration) -> Self {
        Self::with_base(DEFAULT_BASE, cap)
    }

    /// Create a backoff sequence with an explicit base unit.
    pub const fn with_base(base: Duration, cap: Duration) -> Self {
        Self {
            prev: 0,
            curr: 1,
            base,
            cap,
        }
    }
}

impl Iterator for FibonacciBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let next = self.prev.saturating_add(self.curr);
        self.prev = self.curr;
        self.curr = next;

        let delay = self.base.saturating_mul(u32::try_from(self.prev).unwrap_or(u32::MAX));
        Some(delay.min(self.cap))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn millis(backoff: FibonacciBackoff, n: usize) -> Vec<u128> {
        backoff.take(n).map(|d| d.as_millis()).collect()
    }

    #[test]
    fn thirty_minute_cap_grows_freely() {
        let backoff = FibonacciBackoff::new(Duration::from_millis(1_800_000));
        assert_eq!(
            millis(backoff, 6),
            vec![60_000, 60_000, 120_000, 180_000, 300_000, 480_000]
        );
    }

    #[test]
    fn five_minute_cap_clamps_and_stays_clamped() {
        let backoff = FibonacciBackoff::new(Duration::from_millis(300_000));
        assert_eq!(
            millis(backoff, 7),
            vec![60_000, 60_000, 120_000, 180_000, 300_000, 300_000, 300_000]
        );
    }

    #[test]
    fn sequence_is_monotonic_until_cap() {
        let mut last = Duration::ZERO;
        for delay in FibonacciBackoff::new(Duration::from_secs(3600)).take(12) {
            assert!(delay >= last, "sequence must never shrink");
            last = delay;
        }
    }

    #[test]
    fn fresh_iterator_restarts_sequence() {
        let cap = Duration::from_secs(600);
        let first: Vec<_> = FibonacciBackoff::new(cap).take(4).collect();
        let second: Vec<_> = FibonacciBackoff::new(cap).take(4).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn custom_base_unit() {
        let backoff = FibonacciBackoff::with_base(
            Duration::from_millis(10),
            Duration::from_millis(40),
        );
        assert_eq!(millis(backoff, 6), vec![10, 10, 20, 30, 40, 40]);
    }

    #[test]
    fn never_exhausts() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(1));
        for _ in 0..100 {
            assert!(backoff.next().is_some());
        }
    }
}
