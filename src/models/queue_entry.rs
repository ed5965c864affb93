use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

crate::status_enum! {
    /// Admission state of a queue entry
    pub enum QueueStatus {
        Queued => "QUEUED",
        Processing => "PROCESSING",
        Completed => "COMPLETED",
        Failed => "FAILED",
        Cancelled => "CANCELLED",
    }
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Resource type -> amount (e.g. `"db_connections" -> 2.0`)
pub type ResourceAmounts = BTreeMap<String, f64>;

/// QueueEntry is one admission request waiting for, or holding, a worker slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub request_id: Uuid,
    /// 1-20, higher served first
    pub priority: i32,
    pub status: QueueStatus,
    pub import_type: String,
    pub requester: String,
    pub tenant_id: String,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_duration_seconds: Option<i64>,
    pub resource_requirements: ResourceAmounts,
    /// Opaque to the queue; interpreted by the orchestrator
    pub configuration: Value,
    /// 1-based rank among `QUEUED` entries, `None` otherwise
    pub queue_position: Option<i32>,
    pub assigned_worker: Option<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Set when a `PROCESSING` entry is cancelled; observed at phase boundaries
    pub cancel_requested: bool,
    pub attempts: i32,
    pub error_message: Option<String>,
    pub orchestration_id: Option<Uuid>,
    /// Set when the entry was created by a schedule firing
    pub schedule_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
}

/// New QueueEntry for creation (without generated fields)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewQueueEntry {
    pub priority: i32,
    pub import_type: String,
    pub requester: String,
    pub tenant_id: String,
    pub estimated_duration_seconds: Option<i64>,
    pub resource_requirements: ResourceAmounts,
    pub configuration: Value,
    pub orchestration_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
}

impl QueueEntry {
    pub fn new(new_entry: NewQueueEntry, requested_at: DateTime<Utc>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            priority: new_entry.priority,
            status: QueueStatus::Queued,
            import_type: new_entry.import_type,
            requester: new_entry.requester,
            tenant_id: new_entry.tenant_id,
            requested_at,
            started_at: None,
            completed_at: None,
            estimated_duration_seconds: new_entry.estimated_duration_seconds,
            resource_requirements: new_entry.resource_requirements,
            configuration: new_entry.configuration,
            queue_position: None,
            assigned_worker: None,
            last_heartbeat_at: None,
            cancel_requested: false,
            attempts: 0,
            error_message: None,
            orchestration_id: new_entry.orchestration_id,
            schedule_id: new_entry.schedule_id,
            execution_id: new_entry.execution_id,
        }
    }

    /// Dispatch order: priority descending, then requested time ascending.
    /// The request id breaks exact ties so the order is total.
    pub fn dispatch_cmp(a: &QueueEntry, b: &QueueEntry) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.requested_at.cmp(&b.requested_at))
            .then_with(|| a.request_id.cmp(&b.request_id))
    }

    /// Whether a processing entry's worker missed its heartbeat deadline
    pub fn is_abandoned(&self, deadline: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Processing
            && self
                .last_heartbeat_at
                .or(self.started_at)
                .map(|beat| beat < deadline)
                .unwrap_or(true)
    }

    pub fn is_held_by(&self, worker_id: &str) -> bool {
        self.status == QueueStatus::Processing && self.assigned_worker.as_deref() == Some(worker_id)
    }

    /// Whether `current` is still the claim this entry was dequeued under
    pub fn same_claim(&self, current: &QueueEntry) -> bool {
        current.status == QueueStatus::Processing
            && current.assigned_worker == self.assigned_worker
            && current.attempts == self.attempts
    }
}

/// Result of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The entry was still queued and is now `CANCELLED`
    Cancelled,
    /// The entry is processing; the orchestrator stops at the next phase boundary
    CancellationRequested,
    /// The entry had already reached a terminal status
    AlreadyFinished,
}
