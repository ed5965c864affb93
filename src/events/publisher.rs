use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::constants::events as names;
use crate::models::{ExecutionStatus, ImportPhase, QueueStatus, RollbackActionType};
use crate::state_machine::OrchestrationStatus;

/// Lifecycle events emitted by the queue, lock, orchestration, rollback and
/// scheduling components
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ImportEvent {
    RequestEnqueued {
        request_id: Uuid,
        priority: i32,
        queue_position: i32,
    },
    RequestDequeued {
        request_id: Uuid,
        worker_id: String,
    },
    RequestRequeued {
        request_id: Uuid,
        reason: String,
    },
    RequestFinished {
        request_id: Uuid,
        status: QueueStatus,
    },
    CancelRequested {
        request_id: Uuid,
    },
    LockGranted {
        resource: String,
        owner: Uuid,
    },
    LockConflict {
        resource: String,
        owner: Uuid,
        holders: Vec<Uuid>,
    },
    LockReleased {
        owner: Uuid,
        count: u64,
    },
    LocksReclaimed {
        count: usize,
    },
    PhaseStarted {
        orchestration_id: Uuid,
        phase: ImportPhase,
    },
    PhaseProgress {
        orchestration_id: Uuid,
        phase: String,
        step: String,
        percentage: f64,
    },
    PhaseCompleted {
        orchestration_id: Uuid,
        phase: ImportPhase,
    },
    PhaseFailed {
        orchestration_id: Uuid,
        phase: ImportPhase,
        error: String,
    },
    OrchestrationFinished {
        orchestration_id: Uuid,
        status: OrchestrationStatus,
    },
    RollbackActionRecorded {
        orchestration_id: Uuid,
        entity_type: String,
        action_type: RollbackActionType,
        success: bool,
    },
    RollbackFinished {
        orchestration_id: Uuid,
        partial_failure: bool,
    },
    ScheduleFired {
        schedule_id: Uuid,
        execution_id: Uuid,
        request_id: Option<Uuid>,
    },
    ScheduleRejected {
        schedule_id: Uuid,
        reason: String,
    },
    ScheduleExecutionFinished {
        schedule_id: Uuid,
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

impl ImportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestEnqueued { .. } => names::REQUEST_ENQUEUED,
            Self::RequestDequeued { .. } => names::REQUEST_DEQUEUED,
            Self::RequestRequeued { .. } => names::REQUEST_REQUEUED,
            Self::RequestFinished { .. } => names::REQUEST_FINISHED,
            Self::CancelRequested { .. } => names::REQUEST_CANCEL_REQUESTED,
            Self::LockGranted { .. } => names::LOCK_GRANTED,
            Self::LockConflict { .. } => names::LOCK_CONFLICT,
            Self::LockReleased { .. } => names::LOCK_RELEASED,
            Self::LocksReclaimed { .. } => names::LOCKS_RECLAIMED,
            Self::PhaseStarted { .. } => names::PHASE_STARTED,
            Self::PhaseProgress { .. } => names::PHASE_PROGRESS,
            Self::PhaseCompleted { .. } => names::PHASE_COMPLETED,
            Self::PhaseFailed { .. } => names::PHASE_FAILED,
            Self::OrchestrationFinished { .. } => names::ORCHESTRATION_FINISHED,
            Self::RollbackActionRecorded { .. } => names::ROLLBACK_ACTION_RECORDED,
            Self::RollbackFinished { .. } => names::ROLLBACK_FINISHED,
            Self::ScheduleFired { .. } => names::SCHEDULE_FIRED,
            Self::ScheduleRejected { .. } => names::SCHEDULE_REJECTED,
            Self::ScheduleExecutionFinished { .. } => names::SCHEDULE_EXECUTION_FINISHED,
        }
    }
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: &'static str,
    pub event: ImportEvent,
    pub published_at: DateTime<Utc>,
}

/// Broadcast publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: ImportEvent) {
        let published = PublishedEvent {
            name: event.name(),
            event,
            published_at: Utc::now(),
        };
        // No subscribers is not an error for observability events
        let _ = self.sender.send(published);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
