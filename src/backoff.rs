//! # Restart delay policy.
//!
//! [`Backoff`] generates the delay slept before the next spawn after a
//! failed run. It is parameterized by:
//! - `min`: the initial delay;
//! - `max`: the delay cap;
//! - `factor`: the multiplicative growth factor;
//! - `jitter`: the randomization fraction applied to returned values.
//!
//! [`Backoff::next`] returns the current delay (with jitter applied),
//! then grows the stored delay by `factor`, capped at `max`. The stored
//! delay always stays within `[min, max]`; a clean exit calls
//! [`Backoff::reset`] to restore it to `min`.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use sshvisor::{Backoff, RestartConfig};
//!
//! let mut backoff = Backoff::new(&RestartConfig {
//!     min_delay_ms: 2_000,
//!     max_delay_ms: 30_000,
//!     factor: 2.0,
//!     jitter: 0.0,
//!     debounce_ms: 0,
//! });
//!
//! assert_eq!(backoff.next(), Duration::from_millis(2_000));
//! assert_eq!(backoff.next(), Duration::from_millis(4_000));
//! assert_eq!(backoff.next(), Duration::from_millis(8_000));
//!
//! backoff.reset();
//! assert_eq!(backoff.next(), Duration::from_millis(2_000));
//! ```

use std::time::Duration;

use rand::Rng;

use crate::config::RestartConfig;

/// Stateful exponential backoff with bounded uniform jitter.
///
/// One instance lives inside each supervisor; there is no shared cursor
/// between instances.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
    current: Duration,
}

impl Backoff {
    /// Builds a backoff from restart configuration.
    ///
    /// Out-of-range parameters are clamped: `max` is raised to `min`,
    /// `factor` floored at 1.0, `jitter` clamped to `[0, 1]`.
    pub fn new(cfg: &RestartConfig) -> Self {
        let min = Duration::from_millis(cfg.min_delay_ms);
        let max = Duration::from_millis(cfg.max_delay_ms).max(min);
        Self {
            min,
            max,
            factor: cfg.factor.max(1.0),
            jitter: cfg.jitter.clamp(0.0, 1.0),
            current: min,
        }
    }

    /// Returns the delay to sleep now and advances the stored delay.
    ///
    /// Jitter applies to the returned value only: uniformly sampled from
    /// `[d·(1−jitter), d·(1+jitter)]`, floored at zero. The stored delay
    /// advances unjittered.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;

        let grown = self.current.as_secs_f64() * self.factor;
        self.current = if grown.is_finite() {
            self.current.mul_f64(self.factor).min(self.max)
        } else {
            self.max
        };

        self.apply_jitter(delay)
    }

    /// Restores the stored delay to `min`.
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Returns the unjittered stored delay, for observability.
    pub fn current(&self) -> Duration {
        self.current
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let base = delay.as_secs_f64();
        let low = (base * (1.0 - self.jitter)).max(0.0);
        let high = base * (1.0 + self.jitter);
        let sampled = rand::rng().random_range(low..=high);
        Duration::from_secs_f64(sampled.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min: u64, max: u64, factor: f64, jitter: f64) -> RestartConfig {
        RestartConfig {
            min_delay_ms: min,
            max_delay_ms: max,
            factor,
            jitter,
            debounce_ms: 0,
        }
    }

    #[test]
    fn doubles_until_saturated() {
        let mut backoff = Backoff::new(&config(2_000, 30_000, 2.0, 0.0));
        let mut observed = Vec::new();
        for _ in 0..6 {
            observed.push(backoff.next().as_millis() as u64);
        }
        assert_eq!(observed, vec![2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);

        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_millis(2_000));
    }

    #[test]
    fn stored_delay_saturates_at_max() {
        let mut backoff = Backoff::new(&config(100, 1_000, 3.0, 0.0));
        for _ in 0..10 {
            backoff.next();
        }
        assert_eq!(backoff.current(), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(&config(1_000, 1_000, 1.0, 0.5));
        for _ in 0..200 {
            let delay = backoff.next().as_secs_f64();
            assert!((0.5..=1.5).contains(&delay), "delay {delay} out of bounds");
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let mut backoff = Backoff::new(&config(500, 30_000, 2.0, 0.0));
        assert_eq!(backoff.next(), Duration::from_millis(500));
        assert_eq!(backoff.next(), Duration::from_millis(1_000));
    }

    #[test]
    fn current_reports_unjittered_delay() {
        let mut backoff = Backoff::new(&config(1_000, 8_000, 2.0, 1.0));
        backoff.next();
        assert_eq!(backoff.current(), Duration::from_millis(2_000));
        backoff.next();
        assert_eq!(backoff.current(), Duration::from_millis(4_000));
    }

    #[test]
    fn clamps_bad_parameters() {
        let backoff = Backoff::new(&config(5_000, 1_000, 0.1, 7.0));
        assert_eq!(backoff.current(), Duration::from_millis(5_000));

        let mut backoff = backoff;
        // factor floored at 1.0: the delay never shrinks.
        backoff.next();
        assert!(backoff.current() >= Duration::from_millis(5_000));
    }
}
