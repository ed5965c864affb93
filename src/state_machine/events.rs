use serde::{Deserialize, Serialize};

/// Events that drive orchestration status transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrchestrationEvent {
    /// A worker begins driving phases
    Start,
    /// Release/Finalize finished
    Complete,
    /// A phase failed or the request was cancelled
    Fail(String),
    /// Compensation ran after a failure
    Rollback(String),
    /// An operator asked to undo a finished import
    OperatorRollback(String),
}

impl OrchestrationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Rollback(_) => "rollback",
            Self::OperatorRollback(_) => "operator_rollback",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Fail(reason) | Self::Rollback(reason) | Self::OperatorRollback(reason) => {
                Some(reason)
            }
            _ => None,
        }
    }

    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}
