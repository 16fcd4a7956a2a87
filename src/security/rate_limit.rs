//! Token bucket rate limiting for outbound calls.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Continuously refilled token bucket.
///
/// One bucket gates every call made through an egress client; clones of the
/// client share it.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket that starts full.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Take one token.
    ///
    /// On exhaustion returns the time until the next token becomes available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - state.tokens;
            // Tiny refill rates overflow `Duration`; saturate instead.
            let wait = if self.refill_per_sec > 0.0 {
                Duration::try_from_secs_f64(missing / self.refill_per_sec).unwrap_or(Duration::MAX)
            } else {
                Duration::MAX
            };
            Err(wait)
        }
    }

    /// Tokens currently available, after refill.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}
