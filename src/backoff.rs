//! Backoff for transient connectivity failures.
//!
//! Unlike a retry loop that owns its attempt counter, the dispatch worker
//! sees transient failures spread across separate queue passes, so the delay
//! state lives here: [`RetryDelay`] grows exponentially with each consecutive
//! failure and snaps back to the base on the next success.
//!
//! Delays are jittered into `[delay/2, delay]` so a flapping link does not
//! resubmit every backlogged task on the same tick. Computations saturate at
//! the configured max.

use crate::error::ConfigError;
use rand::{rng, Rng};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Jittered exponential delay over consecutive transient failures.
#[derive(Debug)]
pub struct RetryDelay {
    base: Duration,
    max: Duration,
    consecutive: AtomicU32,
}

impl RetryDelay {
    /// Create a delay policy. `base` must be non-zero and no greater than
    /// `max`.
    pub fn new(base: Duration, max: Duration) -> Result<Self, ConfigError> {
        if base.is_zero() || base > max {
            return Err(ConfigError::InvalidRetryBackoff { base, max });
        }
        Ok(Self { base, max, consecutive: AtomicU32::new(0) })
    }

    /// Record one more consecutive failure and return the delay to apply
    /// before the next attempt.
    pub fn next(&self) -> Duration {
        let failures = self.consecutive.fetch_add(1, Ordering::SeqCst);
        // 2^failures, clamped well below any shift that could overflow.
        let exponent = failures.min(63);
        let scaled = self.base.as_nanos().saturating_mul(1u128 << exponent);
        let capped = scaled.min(self.max.as_nanos());
        jitter(Duration::from_nanos(capped.min(u64::MAX as u128) as u64))
    }

    /// Snap back to the base delay after a successful exchange.
    pub fn reset(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }

    /// Consecutive failures observed since the last reset.
    pub fn failures(&self) -> u32 {
        self.consecutive.load(Ordering::SeqCst)
    }
}

/// Equal jitter: uniform in `[delay/2, delay]`, keeping a floor so retries
/// are never immediate once a delay applies.
fn jitter(delay: Duration) -> Duration {
    let nanos = delay.as_nanos().min(u64::MAX as u128) as u64;
    if nanos < 2 {
        return delay;
    }
    let half = nanos / 2;
    Duration::from_nanos(half + rng().random_range(0..=half))
}
