//! Exponential backoff with full jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff schedule parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Draw the delay uniformly from `[0, delay)` instead of using it as-is.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Backoff {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self)
    }
}

/// Delay before the retry that follows zero-based `attempt`.
///
/// `min(base * multiplier^attempt, max)`; with jitter the result is uniform in
/// `[0, that)`.
pub fn calculate_backoff(attempt: u32, backoff: &Backoff) -> Duration {
    let base_ns = backoff.base_delay.as_nanos() as f64;
    let max_ns = backoff.max_delay.as_nanos() as f64;
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw_ns = base_ns * backoff.multiplier.powi(exponent);
    let capped_ns = if raw_ns.is_finite() { raw_ns.min(max_ns) } else { max_ns };

    if backoff.jitter && capped_ns >= 1.0 {
        // Floor keeps the jittered value strictly below the ceiling.
        let drawn = rand::thread_rng().gen_range(0.0..capped_ns);
        return Duration::from_nanos(drawn.floor() as u64);
    }

    Duration::from_nanos(capped_ns.max(0.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(jitter: bool) -> Backoff {
        Backoff {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
            multiplier: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let b = schedule(false);
        assert_eq!(calculate_backoff(0, &b), Duration::from_millis(100));
        assert_eq!(calculate_backoff(1, &b), Duration::from_millis(200));
        assert_eq!(calculate_backoff(3, &b), Duration::from_millis(800));
        assert_eq!(calculate_backoff(10, &b), Duration::from_millis(2000));
    }

    #[test]
    fn non_decreasing_up_to_ceiling() {
        let b = schedule(false);
        let mut previous = Duration::ZERO;
        for attempt in 0..40 {
            let delay = calculate_backoff(attempt, &b);
            assert!(delay >= previous);
            assert!(delay <= b.max_delay);
            previous = delay;
        }
        assert_eq!(calculate_backoff(u32::MAX, &b), b.max_delay);
    }

    #[test]
    fn jitter_stays_below_computed_delay() {
        let b = schedule(true);
        for attempt in 0..8 {
            let ceiling = calculate_backoff(attempt, &schedule(false));
            for _ in 0..200 {
                let delay = calculate_backoff(attempt, &b);
                assert!(delay < ceiling, "attempt {attempt}: {delay:?} >= {ceiling:?}");
            }
        }
    }

    #[test]
    fn zero_base_never_sleeps() {
        let b = Backoff {
            base_delay: Duration::ZERO,
            ..schedule(true)
        };
        assert_eq!(calculate_backoff(5, &b), Duration::ZERO);
    }
}
