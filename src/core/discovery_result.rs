//! Discovery result and retry policy models

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Host used when the companion service never answers
pub const FALLBACK_HOST: &str = "127.0.0.1";

/// Port used when the companion service never answers
pub const FALLBACK_PORT: u16 = 8080;

/// Shortest time a single discovery request is given to answer
pub const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

/// Network location of the companion service.
///
/// Always fully formed: either what the service reported or the fallback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub host: String,
    pub port: u16,
}

impl DiscoveryResult {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The known-good default `127.0.0.1:8080`
    pub fn fallback() -> Self {
        Self::new(FALLBACK_HOST, FALLBACK_PORT)
    }

    pub fn is_fallback(&self) -> bool {
        self.host == FALLBACK_HOST && self.port == FALLBACK_PORT
    }
}

impl std::fmt::Display for DiscoveryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How hard discovery tries before settling for the fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay_between_attempts: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay_between_attempts: Duration) -> Self {
        Self {
            max_attempts,
            delay_between_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_between_attempts(&self) -> Duration {
        self.delay_between_attempts
    }

    /// How long one request may take. Never below [`MIN_ATTEMPT_TIMEOUT`],
    /// so a short delay cannot starve a healthy service.
    pub fn attempt_timeout(&self) -> Duration {
        self.delay_between_attempts.max(MIN_ATTEMPT_TIMEOUT)
    }

    /// Upper bound on the time a full discovery run can take
    pub fn total_budget(&self) -> Duration {
        self.attempt_timeout() * self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback() {
        let fallback = DiscoveryResult::fallback();
        assert_eq!(fallback, DiscoveryResult::new("127.0.0.1", 8080));
        assert!(fallback.is_fallback());
        assert_eq!(fallback.to_string(), "127.0.0.1:8080");
        assert!(!DiscoveryResult::new("10.0.0.5", 9090).is_fallback());
    }

    #[test]
    fn test_total_budget() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1500));
        assert_eq!(policy.total_budget(), Duration::from_millis(7500));
        assert_eq!(RetryPolicy::default().total_budget(), Duration::from_secs(10));
    }

    #[test]
    fn test_short_delays_keep_a_usable_timeout() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        assert_eq!(policy.attempt_timeout(), MIN_ATTEMPT_TIMEOUT);
        assert_eq!(policy.total_budget(), MIN_ATTEMPT_TIMEOUT * 5);

        let policy = RetryPolicy::new(2, Duration::from_secs(2));
        assert_eq!(policy.attempt_timeout(), Duration::from_secs(2));
    }
}
