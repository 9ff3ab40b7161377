//! Shared exponential backoff with jitter.
//!
//! Both the outbox relay and the inbox retry loop need the same capped
//! exponential curve, so it lives in its own crate rather than being
//! duplicated into each engine.

use rand::Rng;
use std::time::Duration;

/// Base and cap for the capped-exponential curve, in seconds.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_seconds: u64,
    pub max_seconds: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_seconds: 2,
            max_seconds: 3600,
        }
    }
}

/// `backoff(n) = clamp(base * 2^n, <= max) + jitter`, jitter uniform in
/// `[-0.1*d, +0.1*d]` where `d` is the clamped delay. Result is in
/// milliseconds and never negative.
pub fn backoff(config: &BackoffConfig, retry_count: u32) -> Duration {
    let base_ms = config.base_seconds.saturating_mul(1000);
    let max_ms = config.max_seconds.saturating_mul(1000);

    let exp = 2f64.powi(retry_count.min(32) as i32);
    let raw_ms = (base_ms as f64 * exp).min(max_ms as f64);

    let jitter_band = raw_ms * 0.1;
    let jitter = rand::thread_rng().gen_range(-jitter_band..=jitter_band);

    let delayed_ms = (raw_ms + jitter).max(0.0);
    Duration::from_millis(delayed_ms.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_within_jitter_band() {
        let config = BackoffConfig {
            base_seconds: 2,
            max_seconds: 3600,
        };

        for n in 0..6 {
            let d = backoff(&config, n);
            let expected = (2000u64 * 2u64.pow(n)) as f64;
            let band = expected * 0.1;
            let ms = d.as_millis() as f64;
            assert!(
                ms >= expected - band && ms <= expected + band,
                "retry {n}: {ms} outside [{}, {}]",
                expected - band,
                expected + band
            );
        }
    }

    #[test]
    fn clamps_at_cap() {
        let config = BackoffConfig {
            base_seconds: 2,
            max_seconds: 10,
        };
        let d = backoff(&config, 20);
        let ms = d.as_millis() as f64;
        // capped at 10s +/- 10% jitter band
        assert!(ms <= 11_000.0, "expected <= 11000ms, got {ms}");
        assert!(ms >= 9_000.0, "expected >= 9000ms, got {ms}");
    }

    #[test]
    fn never_negative() {
        let config = BackoffConfig {
            base_seconds: 0,
            max_seconds: 0,
        };
        let d = backoff(&config, 0);
        assert_eq!(d.as_millis(), 0);
    }
}
