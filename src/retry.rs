//! Retry and backoff configuration for `Publisher::publish_with_retry`.

use rand::Rng;
use std::time::Duration;

/// Sentinel passed as `max_retries` to mean "retry forever".
pub const INFINITE_RETRIES: u32 = u32::MAX;

/// Retry/backoff configuration for one publisher's send loop.
///
/// `max_retries = N` means up to `N + 1` total attempts (one initial plus
/// `N` retries). [`INFINITE_RETRIES`] retries until success or cancellation.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_retries: u32,
    /// Symmetric jitter ratio applied to the computed delay: the final
    /// delay is `base * (1 + U(-jitter_ratio, jitter_ratio))`.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(60),
            max_retries: 10,
            jitter_ratio: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    pub fn with_max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio;
        self
    }

    /// Backoff for the given zero-indexed retry attempt (0 = first retry,
    /// i.e. delay before the second overall attempt), with jitter applied.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = 2f64.powi(attempt as i32);
        let base = (self.initial_backoff.as_secs_f64() * exp).min(self.max_backoff.as_secs_f64());
        apply_jitter(base, self.jitter_ratio)
    }

    /// Whether another attempt should be made after `attempt` retries have
    /// already happened (0 = no retries yet).
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_retries == INFINITE_RETRIES || attempt < self.max_retries
    }
}

fn apply_jitter(base_secs: f64, jitter_ratio: f64) -> Duration {
    if jitter_ratio <= 0.0 {
        return Duration::from_secs_f64(base_secs.max(0.0));
    }
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(-jitter_ratio..=jitter_ratio);
    Duration::from_secs_f64((base_secs * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_retry_respects_max_retries() {
        let cfg = RetryConfig::new().with_max_retries(2);
        assert!(cfg.should_retry(0));
        assert!(cfg.should_retry(1));
        assert!(!cfg.should_retry(2));
    }

    #[test]
    fn infinite_retries_never_stop() {
        let cfg = RetryConfig::new().with_max_retries(INFINITE_RETRIES);
        assert!(cfg.should_retry(1_000_000));
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let cfg = RetryConfig::new()
            .with_initial_backoff(Duration::from_millis(50))
            .with_jitter_ratio(0.0);
        assert_eq!(cfg.backoff_for_attempt(0), Duration::from_millis(50));
        assert_eq!(cfg.backoff_for_attempt(1), Duration::from_millis(100));
    }

    #[test]
    fn backoff_is_capped_at_max() {
        let cfg = RetryConfig::new()
            .with_initial_backoff(Duration::from_secs(10))
            .with_max_backoff(Duration::from_secs(15))
            .with_jitter_ratio(0.0);
        assert_eq!(cfg.backoff_for_attempt(5), Duration::from_secs(15));
    }
}
