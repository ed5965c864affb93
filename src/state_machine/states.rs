use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::StateMachineError;

/// Lifecycle of one multi-phase orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationStatus {
    /// Created, waiting in the queue
    #[default]
    Pending,
    /// A worker is driving phases
    InProgress,
    Completed,
    Failed,
    /// Compensating actions were executed
    RolledBack,
}

impl OrchestrationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrchestrationStatus {
    type Err = StateMachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "ROLLED_BACK" => Ok(Self::RolledBack),
            _ => Err(StateMachineError::InvalidStatus(format!(
                "orchestration status {s}"
            ))),
        }
    }
}

/// Status of one logical import attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }

    /// Batches take one terminal status; the only later change is an
    /// operator rollback of a finished batch.
    pub fn can_finalize_to(&self, target: BatchStatus) -> bool {
        match (self, target) {
            (Self::InProgress, t) => t.is_terminal(),
            (Self::Completed | Self::Failed, Self::RolledBack) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }
}

impl From<OrchestrationStatus> for BatchStatus {
    fn from(status: OrchestrationStatus) -> Self {
        match status {
            OrchestrationStatus::Pending | OrchestrationStatus::InProgress => Self::InProgress,
            OrchestrationStatus::Completed => Self::Completed,
            OrchestrationStatus::Failed => Self::Failed,
            OrchestrationStatus::RolledBack => Self::RolledBack,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = StateMachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "ROLLED_BACK" => Ok(Self::RolledBack),
            _ => Err(StateMachineError::InvalidStatus(format!("batch status {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestration_terminal_check() {
        assert!(OrchestrationStatus::Completed.is_terminal());
        assert!(OrchestrationStatus::Failed.is_terminal());
        assert!(OrchestrationStatus::RolledBack.is_terminal());
        assert!(!OrchestrationStatus::Pending.is_terminal());
        assert!(!OrchestrationStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_batch_finalize_rules() {
        assert!(BatchStatus::InProgress.can_finalize_to(BatchStatus::Completed));
        assert!(BatchStatus::InProgress.can_finalize_to(BatchStatus::Failed));
        assert!(!BatchStatus::InProgress.can_finalize_to(BatchStatus::InProgress));
        assert!(BatchStatus::Completed.can_finalize_to(BatchStatus::RolledBack));
        assert!(BatchStatus::Failed.can_finalize_to(BatchStatus::RolledBack));
        assert!(!BatchStatus::Completed.can_finalize_to(BatchStatus::Failed));
        assert!(!BatchStatus::RolledBack.can_finalize_to(BatchStatus::RolledBack));
    }

    #[test]
    fn test_status_string_conversion() {
        assert_eq!(OrchestrationStatus::RolledBack.to_string(), "ROLLED_BACK");
        assert_eq!(
            "IN_PROGRESS".parse::<OrchestrationStatus>().unwrap(),
            OrchestrationStatus::InProgress
        );
        assert!("in_progress".parse::<OrchestrationStatus>().is_err());
        assert_eq!(
            "FAILED".parse::<BatchStatus>().unwrap(),
            BatchStatus::Failed
        );
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&OrchestrationStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let parsed: OrchestrationStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, OrchestrationStatus::InProgress);
    }
}
