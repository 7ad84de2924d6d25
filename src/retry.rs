//! Jittered exponential back-off for per-task retries (C8 §4.8 step 5).
//!
//! Generalizes this codebase's reconnect-backoff calculator (base/multiplier/cap/jitter) to
//! the collection engine's fixed three-attempt retry schedule: 1s, 4s, 16s, jittered ±25%.

use std::time::Duration;

use rand::Rng;

pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_ms: u64,
    multiplier: f64,
    jitter_factor: f64,
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            multiplier: 4.0,
            jitter_factor: 0.25,
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Back-off duration before the given (zero-indexed) retry attempt: 1s, 4s, 16s before
    /// jitter, matching the spec's fixed schedule.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.base_ms as f64 * self.multiplier.powi(attempt as i32);
        let jitter_range = base * self.jitter_factor;
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_stays_within_jitter_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 0..MAX_ATTEMPTS {
            let expected_base = 1000.0 * 4f64.powi(attempt as i32);
            let lower = (expected_base * 0.75) as u64;
            let upper = (expected_base * 1.25) as u64;
            for _ in 0..50 {
                let d = policy.backoff_for(attempt).as_millis() as u64;
                assert!(d >= lower && d <= upper, "attempt {attempt}: {d} not in [{lower},{upper}]");
            }
        }
    }
}
