//! # Backoff
//!
//! Exponential backoff with a ceiling, shared by lock acquisition retries and
//! local transient-error retries.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{LockConfig, RetryConfig};

/// Exponential backoff: `base * multiplier^attempt`, capped at `max`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    pub fn from_lock_config(config: &LockConfig) -> Self {
        Self {
            base_delay_ms: config.backoff_base_ms,
            max_delay_ms: config.backoff_max_ms,
            multiplier: config.backoff_multiplier,
        }
    }

    pub fn from_retry_config(config: &RetryConfig) -> Self {
        Self {
            base_delay_ms: config.transient_backoff_ms,
            max_delay_ms: config.transient_backoff_ms.saturating_mul(8),
            multiplier: 2.0,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = exponential.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_with_cap() {
        let policy = BackoffPolicy {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(30), Duration::from_millis(1_000));
    }

    #[test]
    fn test_from_lock_config() {
        let policy = BackoffPolicy::from_lock_config(&LockConfig::default());
        assert_eq!(policy.base_delay_ms, 200);
        assert_eq!(policy.max_delay_ms, 5_000);
    }
}
