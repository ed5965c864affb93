//! # Error Taxonomy
//!
//! One crate-wide error type. The first four variants are the failure classes the
//! orchestrator reasons about; the rest are infrastructure errors that get
//! classified into one of those classes when they terminate an orchestration.

use thiserror::Error;
use uuid::Uuid;

use crate::state_machine::StateMachineError;

#[derive(Error, Debug)]
pub enum ImportError {
    /// Prerequisite entity type missing or row-level validation failed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource unavailable after bounded retries.
    #[error("Lock conflict on {resource} after {attempts} attempts")]
    LockConflict { resource: String, attempts: u32 },

    /// Timeout or connectivity loss; retried by the failing component.
    #[error("Transient error during {operation}: {message}")]
    RetryableTransient { operation: String, message: String },

    /// Inconsistent staging data, torn promotion, exhausted retries.
    #[error("Fatal orchestration error: {0}")]
    FatalOrchestration(String),

    #[error("Phase {phase} exceeded its timeout of {timeout_seconds}s")]
    PhaseTimeout { phase: String, timeout_seconds: u64 },

    #[error("Tenant {tenant_id} exceeds {enforcement} limit for {resource_type}: requested {requested}, in use {in_use}, limit {limit}")]
    ResourceLimitExceeded {
        tenant_id: String,
        resource_type: String,
        enforcement: String,
        requested: f64,
        in_use: f64,
        limit: f64,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    InvalidTransition(#[from] StateMachineError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How a terminating error is reported on the batch and orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    LockConflict,
    Fatal,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::LockConflict => "lock_conflict",
            Self::Fatal => "fatal",
            Self::Cancelled => "cancelled",
        }
    }
}

impl ImportError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::FatalOrchestration(msg.into())
    }

    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RetryableTransient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RetryableTransient { .. } => true,
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }

    /// Outcome class when this error terminates an orchestration.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) | Self::NotImplemented(_) | Self::ResourceLimitExceeded { .. } => {
                FailureKind::Validation
            }
            Self::LockConflict { .. } => FailureKind::LockConflict,
            _ => FailureKind::Fatal,
        }
    }
}

impl From<config::ConfigError> for ImportError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ImportError::transient("stage", "connection reset").is_retryable());
        assert!(ImportError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!ImportError::validation("missing Teams").is_retryable());
        assert!(!ImportError::fatal("torn write").is_retryable());
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            ImportError::validation("bad row").failure_kind(),
            FailureKind::Validation
        );
        assert_eq!(
            ImportError::LockConflict {
                resource: "entity-type:Teams".into(),
                attempts: 3
            }
            .failure_kind(),
            FailureKind::LockConflict
        );
        assert_eq!(
            ImportError::PhaseTimeout {
                phase: "stage".into(),
                timeout_seconds: 1
            }
            .failure_kind(),
            FailureKind::Fatal
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = ImportError::LockConflict {
            resource: "entity-type:Teams".into(),
            attempts: 5,
        };
        assert_eq!(
            err.to_string(),
            "Lock conflict on entity-type:Teams after 5 attempts"
        );
    }
}
