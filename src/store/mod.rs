//! # Persistence
//!
//! One async trait per owning component. The relational store is the only
//! source of truth, so every method that must be atomic (claiming a queue
//! entry, acquiring a lock, a status compare-and-set) is a single trait call
//! that implementations execute as one indivisible unit.
//!
//! Two implementations are provided:
//!
//! - [`PgStore`]: Postgres via `sqlx`, safe across many worker processes
//! - [`MemoryStore`]: one `parking_lot::Mutex` around the whole state, for
//!   tests and embedded single-process use

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    CancelOutcome, EntityDependency, ImportBatch, LockOutcome, LockRequest, Orchestration,
    OrchestrationDependency, ProgressTrackingEntry, QueueEntry, QueueStatus, ReservationStatus,
    ResourceKey, ResourceLock, ResourceReservation, RollbackAction, ScheduleExecutionHistory,
    ScheduleStatus, ScheduledImport, TenantResourceLimit,
};
use crate::state_machine::{BatchStatus, OrchestrationStatus};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Queue entry lifecycle, owned by the queue manager
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a `QUEUED` entry and return its 1-based position
    async fn insert_entry(&self, entry: &QueueEntry) -> Result<i32>;

    async fn get_entry(&self, request_id: Uuid) -> Result<Option<QueueEntry>>;

    /// Atomically claim the best `QUEUED` entry, or `None` when the queue is
    /// empty or `max_processing` entries are already `PROCESSING`
    async fn claim_next(
        &self,
        max_processing: usize,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>>;

    /// Move a `PROCESSING` entry held by `worker_id` to a terminal status;
    /// false if another worker has claimed it since
    async fn finish_entry(
        &self,
        request_id: Uuid,
        worker_id: &str,
        status: QueueStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Return a `PROCESSING` entry held by `worker_id` to `QUEUED` without
    /// counting it as a failure
    async fn requeue_entry(&self, request_id: Uuid, worker_id: &str) -> Result<bool>;

    async fn request_cancel(&self, request_id: Uuid, now: DateTime<Utc>) -> Result<CancelOutcome>;

    async fn is_cancel_requested(&self, request_id: Uuid) -> Result<bool>;

    /// Renew the heartbeat; false if the entry is no longer held by `worker_id`
    async fn heartbeat(&self, request_id: Uuid, worker_id: &str, now: DateTime<Utc>)
        -> Result<bool>;

    /// Revert `PROCESSING` entries whose heartbeat is older than `deadline`
    async fn requeue_abandoned(&self, deadline: DateTime<Utc>) -> Result<Vec<Uuid>>;

    async fn recompute_positions(&self) -> Result<()>;

    async fn list_entries(&self, status: Option<QueueStatus>) -> Result<Vec<QueueEntry>>;

    /// Sum of `resource_type` requirements over the tenant's `QUEUED` and
    /// `PROCESSING` entries
    async fn tenant_usage(&self, tenant_id: &str, resource_type: &str) -> Result<f64>;
}

/// Advisory resource locks
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Reclaim expired locks on the key, check for conflicts and insert,
    /// as one atomic unit. A request from the current holder refreshes its lock.
    async fn try_acquire(&self, request: &LockRequest, now: DateTime<Utc>) -> Result<LockOutcome>;

    async fn release(&self, key: &ResourceKey, owner_request_id: Uuid) -> Result<bool>;

    async fn release_all(&self, owner_request_id: Uuid) -> Result<u64>;

    async fn extend_all(&self, owner_request_id: Uuid, expires_at: DateTime<Utc>) -> Result<u64>;

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<ResourceLock>>;

    async fn active_locks(&self, key: &ResourceKey, now: DateTime<Utc>)
        -> Result<Vec<ResourceLock>>;

    async fn locks_held_by(&self, owner_request_id: Uuid) -> Result<Vec<ResourceLock>>;
}

/// Batches, orchestrations, progress and orchestration dependencies
#[async_trait]
pub trait OrchestrationStore: Send + Sync {
    async fn create_batch(&self, batch: &ImportBatch) -> Result<()>;

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<ImportBatch>>;

    async fn batches_for_orchestration(&self, orchestration_id: Uuid) -> Result<Vec<ImportBatch>>;

    /// Write a terminal status if [`BatchStatus::can_finalize_to`] allows it
    async fn finalize_batch(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        statistics: &Value,
        failure_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn create_orchestration(&self, orchestration: &Orchestration) -> Result<()>;

    async fn get_orchestration(&self, orchestration_id: Uuid) -> Result<Option<Orchestration>>;

    /// Persist the whole record if the stored status still equals `expected_from`
    async fn transition_orchestration(
        &self,
        orchestration: &Orchestration,
        expected_from: OrchestrationStatus,
    ) -> Result<bool>;

    /// Persist counters and phase details without changing status
    async fn update_orchestration(&self, orchestration: &Orchestration) -> Result<bool> {
        self.transition_orchestration(orchestration, orchestration.status)
            .await
    }

    /// Insert or replace the entry keyed by (orchestration, phase, step)
    async fn upsert_progress(&self, entry: &ProgressTrackingEntry) -> Result<()>;

    async fn list_progress(&self, orchestration_id: Uuid) -> Result<Vec<ProgressTrackingEntry>>;

    async fn add_dependency(&self, dependency: &OrchestrationDependency) -> Result<()>;

    async fn dependencies_of(&self, orchestration_id: Uuid)
        -> Result<Vec<OrchestrationDependency>>;
}

/// Append-only compensation audit trail
#[async_trait]
pub trait RollbackStore: Send + Sync {
    async fn append_action(&self, action: &RollbackAction) -> Result<()>;

    async fn actions_for(&self, orchestration_id: Uuid) -> Result<Vec<RollbackAction>>;
}

/// Schedules, their execution history and resource reservations
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn insert_schedule(&self, schedule: &ScheduledImport) -> Result<()>;

    async fn get_schedule(&self, schedule_id: Uuid) -> Result<Option<ScheduledImport>>;

    async fn list_schedules(&self) -> Result<Vec<ScheduledImport>>;

    /// `SCHEDULED` schedules with `next_execution_at <= now`
    async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledImport>>;

    /// Persist the schedule if its stored status and execution count still
    /// match, so two tickers cannot both fire one occurrence
    async fn save_schedule(
        &self,
        schedule: &ScheduledImport,
        expected_status: ScheduleStatus,
        expected_execution_count: i32,
    ) -> Result<bool>;

    async fn insert_execution(&self, execution: &ScheduleExecutionHistory) -> Result<()>;

    async fn update_execution(&self, execution: &ScheduleExecutionHistory) -> Result<()>;

    async fn get_execution(&self, execution_id: Uuid) -> Result<Option<ScheduleExecutionHistory>>;

    async fn executions_for(&self, schedule_id: Uuid) -> Result<Vec<ScheduleExecutionHistory>>;

    async fn insert_reservation(&self, reservation: &ResourceReservation) -> Result<()>;

    async fn set_reservation_status(
        &self,
        execution_id: Uuid,
        status: ReservationStatus,
    ) -> Result<u64>;

    async fn reservations_for(&self, schedule_id: Uuid) -> Result<Vec<ResourceReservation>>;

    /// Sum of `RESERVED`/`ACTIVE` amounts overlapping `[from, until)`
    async fn reserved_amount(
        &self,
        tenant_id: &str,
        resource_type: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<f64>;
}

/// Tenant configuration consulted at admission
#[async_trait]
pub trait TenantLimitStore: Send + Sync {
    async fn put_limit(&self, limit: &TenantResourceLimit) -> Result<()>;

    async fn limits_for(&self, tenant_id: &str) -> Result<Vec<TenantResourceLimit>>;
}

/// Static entity ordering configuration
#[async_trait]
pub trait EntityDependencyStore: Send + Sync {
    async fn put_entity_dependency(&self, dependency: &EntityDependency) -> Result<()>;

    async fn entity_dependencies(&self) -> Result<Vec<EntityDependency>>;
}

/// Everything a full deployment needs from one backing store
pub trait ImportStore:
    QueueStore
    + LockStore
    + OrchestrationStore
    + RollbackStore
    + ScheduleStore
    + TenantLimitStore
    + EntityDependencyStore
{
}

impl<T> ImportStore for T where
    T: QueueStore
        + LockStore
        + OrchestrationStore
        + RollbackStore
        + ScheduleStore
        + TenantLimitStore
        + EntityDependencyStore
{
}
