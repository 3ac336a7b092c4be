//! Explicit retry policy: exponential backoff with bounded jitter.
//!
//! Jitter is derived from a hash of the attempt key rather than a RNG:
//! a given (signal, attempt) pair always produces the same delay, and
//! different signals spread out.

use std::time::Duration;

use alloy_primitives::keccak256;

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub exponential_base: f64,
    pub max_delay: Duration,
    /// Fraction of the delay added as jitter, in [0, 1).
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs_f64(config.retry_delay_seconds),
            exponential_base: 2.0,
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.25,
        }
    }

    /// Whether attempt `k` (0-based) may be retried after a retryable
    /// failure. `max_retries` counts retries after the first attempt,
    /// so a signal sees at most `max_retries + 1` submissions.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Backoff before retry `attempt`:
    /// `base * exponential_base^attempt` plus jitter in
    /// `[0, jitter_factor * delay)` keyed on `key`, the whole capped at
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32, key: &str) -> Duration {
        let exp = self.exponential_base.powi(attempt as i32);
        let raw = self.base_delay.as_secs_f64() * exp;

        let digest = keccak256(format!("{key}|{attempt}").as_bytes());
        let bucket = u64::from_be_bytes(digest[..8].try_into().unwrap_or([0u8; 8]));
        let unit = (bucket % 10_000) as f64 / 10_000.0;

        let jittered = raw * (1.0 + self.jitter_factor * unit);
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            exponential_base: 2.0,
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.25,
        }
    }

    #[test]
    fn delays_follow_exponential_schedule_within_jitter() {
        let p = policy();
        for attempt in 0..8u32 {
            let expected = (2.0f64.powi(attempt as i32)).min(30.0);
            let delay = p.delay_for(attempt, "sig").as_secs_f64();
            assert!(delay >= expected, "attempt {attempt}: {delay} < {expected}");
            assert!(
                delay < expected * 1.25,
                "attempt {attempt}: {delay} out of jitter bound"
            );
        }
    }

    #[test]
    fn delay_is_deterministic_per_key() {
        let p = policy();
        assert_eq!(p.delay_for(2, "sig-a"), p.delay_for(2, "sig-a"));
        assert_ne!(p.delay_for(2, "sig-a"), p.delay_for(2, "sig-b"));
    }

    #[test]
    fn retry_budget() {
        // max_retries retries after the initial attempt: four
        // submissions total for max_retries = 3.
        let p = policy();
        assert!(p.allows_retry(0));
        assert!(p.allows_retry(1));
        assert!(p.allows_retry(2));
        assert!(!p.allows_retry(3));
    }

    #[test]
    fn delay_never_exceeds_ceiling() {
        let p = policy();
        for attempt in 0..12u32 {
            assert!(
                p.delay_for(attempt, "some-signal") <= p.max_delay,
                "attempt {attempt} escaped the ceiling"
            );
        }
    }
}
