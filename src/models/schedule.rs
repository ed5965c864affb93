use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::queue_entry::ResourceAmounts;

crate::status_enum! {
    pub enum ScheduleStatus {
        Scheduled => "SCHEDULED",
        Paused => "PAUSED",
        Completed => "COMPLETED",
        Failed => "FAILED",
        Cancelled => "CANCELLED",
    }
}

crate::status_enum! {
    pub enum ExecutionStatus {
        Started => "STARTED",
        Completed => "COMPLETED",
        Failed => "FAILED",
        Cancelled => "CANCELLED",
        /// Firing refused because a HARD tenant limit would be exceeded
        Rejected => "REJECTED",
    }
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }
}

crate::status_enum! {
    pub enum ReservationStatus {
        Reserved => "RESERVED",
        Active => "ACTIVE",
        Released => "RELEASED",
        Expired => "EXPIRED",
    }
}

impl ReservationStatus {
    /// Reservations that still count against tenant capacity
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Reserved | Self::Active)
    }
}

/// Caller input for `Scheduler::create_schedule`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub name: String,
    pub import_type: String,
    pub tenant_id: String,
    pub requester: String,
    /// Cron expression (5 or 6 fields) or `@once` for a single deferred run
    pub schedule_expression: String,
    pub recurring: bool,
    pub priority: i32,
    /// First firing; computed from the expression when absent
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub import_configuration: Value,
    #[serde(default)]
    pub resource_requirements: ResourceAmounts,
    pub expected_duration_minutes: Option<i64>,
    #[serde(default)]
    pub max_retries: i32,
    #[serde(default)]
    pub retry_delay_minutes: i64,
    pub timeout_minutes: Option<i64>,
}

/// A recurring or deferred import definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledImport {
    pub schedule_id: Uuid,
    pub name: String,
    pub import_type: String,
    pub tenant_id: String,
    pub requester: String,
    pub schedule_expression: String,
    pub recurring: bool,
    pub priority: i32,
    pub status: ScheduleStatus,
    pub next_execution_at: Option<DateTime<Utc>>,
    pub last_execution_at: Option<DateTime<Utc>>,
    pub execution_count: i32,
    pub success_count: i32,
    pub failure_count: i32,
    pub import_configuration: Value,
    pub resource_requirements: ResourceAmounts,
    pub expected_duration_minutes: i64,
    pub max_retries: i32,
    pub retry_delay_minutes: i64,
    pub timeout_minutes: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledImport {
    /// `execution_count >= success_count + failure_count`
    pub fn counters_consistent(&self) -> bool {
        self.execution_count >= self.success_count + self.failure_count
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Scheduled
            && self.next_execution_at.is_some_and(|next| next <= now)
    }
}

/// One firing of a schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleExecutionHistory {
    pub execution_id: Uuid,
    pub schedule_id: Uuid,
    pub request_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub records_processed: i64,
    pub error_message: Option<String>,
    pub execution_details: Value,
}

/// Time-boxed resource pre-allocation for a schedule firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReservation {
    pub reservation_id: Uuid,
    pub schedule_id: Uuid,
    pub execution_id: Option<Uuid>,
    pub tenant_id: String,
    pub resource_type: String,
    /// Always > 0
    pub amount: f64,
    pub reserved_from: DateTime<Utc>,
    /// Always after `reserved_from`
    pub reserved_until: DateTime<Utc>,
    pub status: ReservationStatus,
}

impl ResourceReservation {
    pub fn overlaps(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> bool {
        self.reserved_from < until && from < self.reserved_until
    }
}
