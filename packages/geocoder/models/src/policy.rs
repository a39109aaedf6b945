//! Per-service request policy: rate limit, timeout, retry, and circuit
//! breaker settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a batch executor drives one geocoding service.
///
/// Loaded from the `[policy]` table of a service TOML file. Missing keys
/// fall back to the public Nominatim usage policy (1 request per second).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPolicy {
    /// Minimum delay between the start of consecutive requests, including
    /// retries and failed requests.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// Per-request timeout. An expired request counts as a transient failure.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra attempts allowed for transient errors only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff before a retry, doubled on each further retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Consecutive failed addresses that abort the rest of a batch.
    /// `0` disables the breaker.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
}

const fn default_min_delay_ms() -> u64 {
    1000
}

const fn default_timeout_secs() -> u64 {
    10
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_retry_backoff_ms() -> u64 {
    1000
}

const fn default_breaker_threshold() -> u32 {
    10
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            breaker_threshold: default_breaker_threshold(),
        }
    }
}

impl RequestPolicy {
    /// Minimum delay between requests.
    #[must_use]
    pub const fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff before retry number `retry` (1-based): base, 2x base, 4x base...
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_retry() {
        let policy = RequestPolicy {
            retry_backoff_ms: 500,
            ..RequestPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn zero_backoff_stays_zero() {
        let policy = RequestPolicy {
            retry_backoff_ms: 0,
            ..RequestPolicy::default()
        };
        assert!(policy.backoff(4).is_zero());
    }
}
