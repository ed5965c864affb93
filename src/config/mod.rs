//! # Import Orchestrator Configuration
//!
//! Layered configuration built with the `config` crate:
//!
//! 1. Compiled defaults ([`ImportConfig::default`])
//! 2. `config/import-orchestrator.toml` (optional)
//! 3. `config/import-orchestrator.<environment>.toml` (optional)
//! 4. Environment variables prefixed `IMPORT__`, sections separated by `__`
//!    (e.g. `IMPORT__QUEUE__MAX_CONCURRENT=5`)
//!
//! ```rust,no_run
//! use import_orchestrator::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let max_concurrent = manager.config().queue.max_concurrent;
//! let lock_ttl = manager.config().locks.default_ttl();
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{DEFAULT_MAX_CONCURRENT, DEFAULT_PHASE_COUNT};
use crate::error::{ImportError, Result};

pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ImportConfig {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub locks: LockConfig,
    pub orchestration: OrchestrationConfig,
    pub scheduler: SchedulerConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    /// Run embedded migrations when connecting
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/import_orchestrator_development".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 5,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of entries in `PROCESSING` at once
    pub max_concurrent: usize,
    /// A processing entry without a heartbeat for this long is abandoned
    pub heartbeat_timeout_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    /// Idle sleep between empty dequeue attempts
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            heartbeat_timeout_seconds: 120,
            heartbeat_interval_seconds: 30,
            poll_interval_ms: 500,
        }
    }
}

impl QueueConfig {
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_timeout_seconds as i64)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LockConfig {
    pub default_ttl_seconds: u64,
    pub max_acquire_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
    /// Period of the watchdog that reclaims expired locks and abandoned entries
    pub reclaim_interval_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 900,
            max_acquire_attempts: 5,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
            backoff_multiplier: 2.0,
            reclaim_interval_seconds: 60,
        }
    }
}

impl LockConfig {
    pub fn default_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.default_ttl_seconds as i64)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub phase_count: i32,
    /// Per-phase timeout when the request does not carry one
    pub default_phase_timeout_seconds: u64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            phase_count: DEFAULT_PHASE_COUNT,
            default_phase_timeout_seconds: 1_800,
        }
    }
}

impl OrchestrationConfig {
    pub fn default_phase_timeout(&self) -> Duration {
        Duration::from_secs(self.default_phase_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_seconds: u64,
    /// Reservation window used when a schedule does not declare its duration
    pub default_expected_duration_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 60,
            default_expected_duration_minutes: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }
}

/// Local retry policy for transient errors
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_transient_retries: u32,
    pub transient_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_transient_retries: 3,
            transient_backoff_ms: 250,
        }
    }
}

impl RetryConfig {
    pub fn transient_backoff(&self) -> Duration {
        Duration::from_millis(self.transient_backoff_ms)
    }
}

impl ImportConfig {
    /// Reject configurations the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.queue.max_concurrent == 0 {
            problems.push("queue.max_concurrent must be at least 1".to_string());
        }
        if self.queue.heartbeat_timeout_seconds == 0 {
            problems.push("queue.heartbeat_timeout_seconds must be positive".to_string());
        }
        if self.queue.heartbeat_interval_seconds >= self.queue.heartbeat_timeout_seconds {
            problems.push(format!(
                "queue.heartbeat_interval_seconds ({}) must be shorter than heartbeat_timeout_seconds ({})",
                self.queue.heartbeat_interval_seconds, self.queue.heartbeat_timeout_seconds
            ));
        }
        if self.locks.default_ttl_seconds == 0 {
            problems.push("locks.default_ttl_seconds must be positive".to_string());
        }
        if self.locks.max_acquire_attempts == 0 {
            problems.push("locks.max_acquire_attempts must be at least 1".to_string());
        }
        if self.locks.backoff_base_ms > self.locks.backoff_max_ms {
            problems.push("locks.backoff_base_ms must not exceed backoff_max_ms".to_string());
        }
        if self.locks.backoff_multiplier < 1.0 {
            problems.push("locks.backoff_multiplier must be >= 1.0".to_string());
        }
        if self.orchestration.phase_count != DEFAULT_PHASE_COUNT {
            problems.push(format!(
                "orchestration.phase_count must be {DEFAULT_PHASE_COUNT} (validate, acquire_locks, stage, promote, finalize)"
            ));
        }
        if self.orchestration.default_phase_timeout_seconds == 0 {
            problems.push("orchestration.default_phase_timeout_seconds must be positive".to_string());
        }
        if self.scheduler.default_expected_duration_minutes <= 0 {
            problems.push("scheduler.default_expected_duration_minutes must be positive".to_string());
        }
        for (name, seconds) in [
            ("queue.heartbeat_interval_seconds", self.queue.heartbeat_interval_seconds),
            ("locks.reclaim_interval_seconds", self.locks.reclaim_interval_seconds),
            ("scheduler.tick_interval_seconds", self.scheduler.tick_interval_seconds),
        ] {
            if seconds == 0 {
                problems.push(format!("{name} must be positive"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ImportError::Configuration(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ImportConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.max_concurrent, 3);
        assert_eq!(config.orchestration.phase_count, 5);
        assert_eq!(config.locks.default_ttl(), chrono::Duration::seconds(900));
    }

    #[test]
    fn test_validation_collects_all_problems() {
        let mut config = ImportConfig::default();
        config.queue.max_concurrent = 0;
        config.locks.backoff_base_ms = 10_000;
        config.orchestration.phase_count = 7;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_concurrent"));
        assert!(err.contains("backoff_base_ms"));
        assert!(err.contains("phase_count"));
    }
}
