//! In-process store. Every trait method takes the single state mutex for its
//! whole duration, which makes each call atomic exactly like one database
//! transaction would be.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    EntityDependencyStore, LockStore, OrchestrationStore, QueueStore, RollbackStore,
    ScheduleStore, TenantLimitStore,
};
use crate::error::Result;
use crate::models::{
    CancelOutcome, EntityDependency, ImportBatch, LockOutcome, LockRequest, Orchestration,
    OrchestrationDependency, ProgressTrackingEntry, QueueEntry, QueueStatus, ReservationStatus,
    ResourceKey, ResourceLock, ResourceReservation, RollbackAction, ScheduleExecutionHistory,
    ScheduleStatus, ScheduledImport, TenantResourceLimit,
};
use crate::state_machine::{BatchStatus, OrchestrationStatus};

#[derive(Debug, Default)]
struct MemoryState {
    queue: HashMap<Uuid, QueueEntry>,
    locks: Vec<ResourceLock>,
    batches: HashMap<Uuid, ImportBatch>,
    orchestrations: HashMap<Uuid, Orchestration>,
    progress: Vec<ProgressTrackingEntry>,
    orchestration_dependencies: Vec<OrchestrationDependency>,
    rollback_actions: Vec<RollbackAction>,
    schedules: HashMap<Uuid, ScheduledImport>,
    executions: Vec<ScheduleExecutionHistory>,
    reservations: Vec<ResourceReservation>,
    tenant_limits: Vec<TenantResourceLimit>,
    entity_dependencies: Vec<EntityDependency>,
}

impl MemoryState {
    fn recompute_positions(&mut self) {
        let mut queued: Vec<&mut QueueEntry> = self
            .queue
            .values_mut()
            .filter(|entry| entry.status == QueueStatus::Queued)
            .collect();
        queued.sort_by(|a, b| QueueEntry::dispatch_cmp(a, b));
        for (index, entry) in queued.into_iter().enumerate() {
            entry.queue_position = Some(index as i32 + 1);
        }
    }

    /// Whether an entry still waits on a pending or running orchestration
    fn awaits_prerequisite(&self, entry: &QueueEntry) -> bool {
        let Some(orchestration_id) = entry.orchestration_id else {
            return false;
        };
        self.orchestration_dependencies
            .iter()
            .filter(|d| d.orchestration_id == orchestration_id)
            .any(|d| {
                self.orchestrations
                    .get(&d.depends_on_orchestration_id)
                    .is_some_and(|o| !o.status.is_terminal())
            })
    }

    fn processing_count(&self) -> usize {
        self.queue
            .values()
            .filter(|entry| entry.status == QueueStatus::Processing)
            .count()
    }
}

/// [`ImportStore`](super::ImportStore) kept entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every lock row currently stored, expired ones included
    pub fn all_locks(&self) -> Vec<ResourceLock> {
        self.state.lock().locks.clone()
    }

    /// Rewind a processing entry's heartbeat, as if its worker stopped
    pub fn set_heartbeat(&self, request_id: Uuid, at: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        match state.queue.get_mut(&request_id) {
            Some(entry) => {
                entry.last_heartbeat_at = Some(at);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn insert_entry(&self, entry: &QueueEntry) -> Result<i32> {
        let mut state = self.state.lock();
        state.queue.insert(entry.request_id, entry.clone());
        state.recompute_positions();
        Ok(state
            .queue
            .get(&entry.request_id)
            .and_then(|e| e.queue_position)
            .unwrap_or(1))
    }

    async fn get_entry(&self, request_id: Uuid) -> Result<Option<QueueEntry>> {
        Ok(self.state.lock().queue.get(&request_id).cloned())
    }

    async fn claim_next(
        &self,
        max_processing: usize,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>> {
        let mut state = self.state.lock();
        if state.processing_count() >= max_processing {
            return Ok(None);
        }

        let next_id = state
            .queue
            .values()
            .filter(|entry| entry.status == QueueStatus::Queued)
            .filter(|entry| !state.awaits_prerequisite(entry))
            .min_by(|a, b| QueueEntry::dispatch_cmp(a, b))
            .map(|entry| entry.request_id);

        let Some(request_id) = next_id else {
            return Ok(None);
        };

        let claimed = state.queue.get_mut(&request_id).map(|entry| {
            entry.status = QueueStatus::Processing;
            entry.started_at = Some(now);
            entry.last_heartbeat_at = Some(now);
            entry.assigned_worker = Some(worker_id.to_string());
            entry.queue_position = None;
            entry.attempts += 1;
            entry.clone()
        });
        state.recompute_positions();
        Ok(claimed)
    }

    async fn finish_entry(
        &self,
        request_id: Uuid,
        worker_id: &str,
        status: QueueStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        match state.queue.get_mut(&request_id) {
            Some(entry) if entry.is_held_by(worker_id) => {
                entry.status = status;
                entry.completed_at = Some(now);
                entry.error_message = error_message.map(str::to_string);
                entry.queue_position = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue_entry(&self, request_id: Uuid, worker_id: &str) -> Result<bool> {
        let mut state = self.state.lock();
        match state.queue.get_mut(&request_id) {
            Some(entry) if entry.is_held_by(worker_id) => {
                entry.status = QueueStatus::Queued;
                entry.assigned_worker = None;
                entry.last_heartbeat_at = None;
                state.recompute_positions();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn request_cancel(&self, request_id: Uuid, now: DateTime<Utc>) -> Result<CancelOutcome> {
        let mut state = self.state.lock();
        let Some(entry) = state.queue.get_mut(&request_id) else {
            return Err(crate::error::ImportError::NotFound {
                entity: "queue entry",
                id: request_id,
            });
        };
        let outcome = match entry.status {
            QueueStatus::Queued => {
                entry.status = QueueStatus::Cancelled;
                entry.completed_at = Some(now);
                entry.queue_position = None;
                entry.error_message = Some(crate::constants::CANCELLED_REASON.to_string());
                CancelOutcome::Cancelled
            }
            QueueStatus::Processing => {
                entry.cancel_requested = true;
                CancelOutcome::CancellationRequested
            }
            _ => CancelOutcome::AlreadyFinished,
        };
        if outcome == CancelOutcome::Cancelled {
            state.recompute_positions();
        }
        Ok(outcome)
    }

    async fn is_cancel_requested(&self, request_id: Uuid) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .queue
            .get(&request_id)
            .map(|entry| entry.cancel_requested || entry.status == QueueStatus::Cancelled)
            .unwrap_or(false))
    }

    async fn heartbeat(
        &self,
        request_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        match state.queue.get_mut(&request_id) {
            Some(entry) if entry.is_held_by(worker_id) => {
                entry.last_heartbeat_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue_abandoned(&self, deadline: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut state = self.state.lock();
        let mut requeued = Vec::new();
        for entry in state.queue.values_mut() {
            if entry.is_abandoned(deadline) {
                entry.status = QueueStatus::Queued;
                entry.assigned_worker = None;
                entry.last_heartbeat_at = None;
                requeued.push(entry.request_id);
            }
        }
        if !requeued.is_empty() {
            state.recompute_positions();
        }
        Ok(requeued)
    }

    async fn recompute_positions(&self) -> Result<()> {
        self.state.lock().recompute_positions();
        Ok(())
    }

    async fn list_entries(&self, status: Option<QueueStatus>) -> Result<Vec<QueueEntry>> {
        let state = self.state.lock();
        let mut entries: Vec<QueueEntry> = state
            .queue
            .values()
            .filter(|entry| status.map_or(true, |s| entry.status == s))
            .cloned()
            .collect();
        entries.sort_by(QueueEntry::dispatch_cmp);
        Ok(entries)
    }

    async fn tenant_usage(&self, tenant_id: &str, resource_type: &str) -> Result<f64> {
        let state = self.state.lock();
        Ok(state
            .queue
            .values()
            .filter(|entry| {
                entry.tenant_id == tenant_id
                    && matches!(entry.status, QueueStatus::Queued | QueueStatus::Processing)
            })
            .filter_map(|entry| entry.resource_requirements.get(resource_type))
            .sum())
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn try_acquire(&self, request: &LockRequest, now: DateTime<Utc>) -> Result<LockOutcome> {
        let mut state = self.state.lock();
        let key = &request.key;
        state.locks.retain(|lock| {
            !(lock.resource_type == key.resource_type
                && lock.resource_id == key.resource_id
                && lock.is_expired(now))
        });

        let on_key = |lock: &&ResourceLock| {
            lock.resource_type == key.resource_type && lock.resource_id == key.resource_id
        };

        let holders: Vec<ResourceLock> = state
            .locks
            .iter()
            .filter(on_key)
            .filter(|lock| lock.blocks(request))
            .cloned()
            .collect();
        if !holders.is_empty() {
            return Ok(LockOutcome::Conflict { holders });
        }

        let expires_at = now + request.ttl();
        if let Some(existing) = state.locks.iter_mut().find(|lock| {
            lock.resource_type == key.resource_type
                && lock.resource_id == key.resource_id
                && lock.owner_request_id == request.owner_request_id
        }) {
            existing.lock_type = request.lock_type;
            existing.expires_at = expires_at;
            return Ok(LockOutcome::Granted(existing.clone()));
        }

        let lock = request.to_lock(now);
        state.locks.push(lock.clone());
        Ok(LockOutcome::Granted(lock))
    }

    async fn release(&self, key: &ResourceKey, owner_request_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock();
        let before = state.locks.len();
        state.locks.retain(|lock| {
            !(lock.resource_type == key.resource_type
                && lock.resource_id == key.resource_id
                && lock.owner_request_id == owner_request_id)
        });
        Ok(state.locks.len() < before)
    }

    async fn release_all(&self, owner_request_id: Uuid) -> Result<u64> {
        let mut state = self.state.lock();
        let before = state.locks.len();
        state
            .locks
            .retain(|lock| lock.owner_request_id != owner_request_id);
        Ok((before - state.locks.len()) as u64)
    }

    async fn extend_all(&self, owner_request_id: Uuid, expires_at: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock();
        let mut extended = 0;
        for lock in state
            .locks
            .iter_mut()
            .filter(|lock| lock.owner_request_id == owner_request_id)
        {
            if expires_at > lock.acquired_at {
                lock.expires_at = expires_at;
                extended += 1;
            }
        }
        Ok(extended)
    }

    async fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<Vec<ResourceLock>> {
        let mut state = self.state.lock();
        let (expired, live): (Vec<_>, Vec<_>) =
            state.locks.drain(..).partition(|lock| lock.is_expired(now));
        state.locks = live;
        Ok(expired)
    }

    async fn active_locks(
        &self,
        key: &ResourceKey,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResourceLock>> {
        Ok(self
            .state
            .lock()
            .locks
            .iter()
            .filter(|lock| {
                lock.resource_type == key.resource_type
                    && lock.resource_id == key.resource_id
                    && !lock.is_expired(now)
            })
            .cloned()
            .collect())
    }

    async fn locks_held_by(&self, owner_request_id: Uuid) -> Result<Vec<ResourceLock>> {
        Ok(self
            .state
            .lock()
            .locks
            .iter()
            .filter(|lock| lock.owner_request_id == owner_request_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OrchestrationStore for MemoryStore {
    async fn create_batch(&self, batch: &ImportBatch) -> Result<()> {
        self.state.lock().batches.insert(batch.batch_id, batch.clone());
        Ok(())
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<ImportBatch>> {
        Ok(self.state.lock().batches.get(&batch_id).cloned())
    }

    async fn batches_for_orchestration(&self, orchestration_id: Uuid) -> Result<Vec<ImportBatch>> {
        let state = self.state.lock();
        let mut batches: Vec<ImportBatch> = state
            .batches
            .values()
            .filter(|batch| batch.orchestration_id == Some(orchestration_id))
            .cloned()
            .collect();
        batches.sort_by_key(|batch| batch.started_at);
        Ok(batches)
    }

    async fn finalize_batch(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        statistics: &Value,
        failure_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        match state.batches.get_mut(&batch_id) {
            Some(batch) if batch.status.can_finalize_to(status) => {
                batch.status = status;
                batch.ended_at = Some(now);
                batch.statistics = statistics.clone();
                if failure_reason.is_some() {
                    batch.failure_reason = failure_reason.map(str::to_string);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_orchestration(&self, orchestration: &Orchestration) -> Result<()> {
        self.state
            .lock()
            .orchestrations
            .insert(orchestration.orchestration_id, orchestration.clone());
        Ok(())
    }

    async fn get_orchestration(&self, orchestration_id: Uuid) -> Result<Option<Orchestration>> {
        Ok(self.state.lock().orchestrations.get(&orchestration_id).cloned())
    }

    async fn transition_orchestration(
        &self,
        orchestration: &Orchestration,
        expected_from: OrchestrationStatus,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        match state.orchestrations.get_mut(&orchestration.orchestration_id) {
            Some(stored) if stored.status == expected_from => {
                *stored = orchestration.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_progress(&self, entry: &ProgressTrackingEntry) -> Result<()> {
        let mut state = self.state.lock();
        match state.progress.iter_mut().find(|existing| {
            existing.orchestration_id == entry.orchestration_id
                && existing.phase == entry.phase
                && existing.step == entry.step
        }) {
            Some(existing) => {
                let progress_id = existing.progress_id;
                let started_at = existing.started_at;
                *existing = entry.clone();
                existing.progress_id = progress_id;
                existing.started_at = started_at;
            }
            None => state.progress.push(entry.clone()),
        }
        Ok(())
    }

    async fn list_progress(&self, orchestration_id: Uuid) -> Result<Vec<ProgressTrackingEntry>> {
        Ok(self
            .state
            .lock()
            .progress
            .iter()
            .filter(|entry| entry.orchestration_id == orchestration_id)
            .cloned()
            .collect())
    }

    async fn add_dependency(&self, dependency: &OrchestrationDependency) -> Result<()> {
        self.state
            .lock()
            .orchestration_dependencies
            .push(dependency.clone());
        Ok(())
    }

    async fn dependencies_of(
        &self,
        orchestration_id: Uuid,
    ) -> Result<Vec<OrchestrationDependency>> {
        Ok(self
            .state
            .lock()
            .orchestration_dependencies
            .iter()
            .filter(|dep| dep.orchestration_id == orchestration_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RollbackStore for MemoryStore {
    async fn append_action(&self, action: &RollbackAction) -> Result<()> {
        self.state.lock().rollback_actions.push(action.clone());
        Ok(())
    }

    async fn actions_for(&self, orchestration_id: Uuid) -> Result<Vec<RollbackAction>> {
        Ok(self
            .state
            .lock()
            .rollback_actions
            .iter()
            .filter(|action| action.orchestration_id == orchestration_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn insert_schedule(&self, schedule: &ScheduledImport) -> Result<()> {
        self.state
            .lock()
            .schedules
            .insert(schedule.schedule_id, schedule.clone());
        Ok(())
    }

    async fn get_schedule(&self, schedule_id: Uuid) -> Result<Option<ScheduledImport>> {
        Ok(self.state.lock().schedules.get(&schedule_id).cloned())
    }

    async fn list_schedules(&self) -> Result<Vec<ScheduledImport>> {
        let mut schedules: Vec<_> = self.state.lock().schedules.values().cloned().collect();
        schedules.sort_by_key(|schedule| schedule.created_at);
        Ok(schedules)
    }

    async fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledImport>> {
        let mut due: Vec<_> = self
            .state
            .lock()
            .schedules
            .values()
            .filter(|schedule| schedule.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|schedule| schedule.next_execution_at);
        Ok(due)
    }

    async fn save_schedule(
        &self,
        schedule: &ScheduledImport,
        expected_status: ScheduleStatus,
        expected_execution_count: i32,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        match state.schedules.get_mut(&schedule.schedule_id) {
            Some(stored)
                if stored.status == expected_status
                    && stored.execution_count == expected_execution_count =>
            {
                *stored = schedule.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_execution(&self, execution: &ScheduleExecutionHistory) -> Result<()> {
        self.state.lock().executions.push(execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &ScheduleExecutionHistory) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(stored) = state
            .executions
            .iter_mut()
            .find(|e| e.execution_id == execution.execution_id)
        {
            *stored = execution.clone();
        }
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> Result<Option<ScheduleExecutionHistory>> {
        Ok(self
            .state
            .lock()
            .executions
            .iter()
            .find(|e| e.execution_id == execution_id)
            .cloned())
    }

    async fn executions_for(&self, schedule_id: Uuid) -> Result<Vec<ScheduleExecutionHistory>> {
        Ok(self
            .state
            .lock()
            .executions
            .iter()
            .filter(|e| e.schedule_id == schedule_id)
            .cloned()
            .collect())
    }

    async fn insert_reservation(&self, reservation: &ResourceReservation) -> Result<()> {
        self.state.lock().reservations.push(reservation.clone());
        Ok(())
    }

    async fn set_reservation_status(
        &self,
        execution_id: Uuid,
        status: ReservationStatus,
    ) -> Result<u64> {
        let mut state = self.state.lock();
        let mut updated = 0;
        for reservation in state
            .reservations
            .iter_mut()
            .filter(|r| r.execution_id == Some(execution_id))
        {
            reservation.status = status;
            updated += 1;
        }
        Ok(updated)
    }

    async fn reservations_for(&self, schedule_id: Uuid) -> Result<Vec<ResourceReservation>> {
        Ok(self
            .state
            .lock()
            .reservations
            .iter()
            .filter(|r| r.schedule_id == schedule_id)
            .cloned()
            .collect())
    }

    async fn reserved_amount(
        &self,
        tenant_id: &str,
        resource_type: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<f64> {
        Ok(self
            .state
            .lock()
            .reservations
            .iter()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && r.resource_type == resource_type
                    && r.status.is_held()
                    && r.overlaps(from, until)
            })
            .map(|r| r.amount)
            .sum())
    }
}

#[async_trait]
impl TenantLimitStore for MemoryStore {
    async fn put_limit(&self, limit: &TenantResourceLimit) -> Result<()> {
        let mut state = self.state.lock();
        state.tenant_limits.retain(|existing| {
            !(existing.tenant_id == limit.tenant_id && existing.resource_type == limit.resource_type)
        });
        state.tenant_limits.push(limit.clone());
        Ok(())
    }

    async fn limits_for(&self, tenant_id: &str) -> Result<Vec<TenantResourceLimit>> {
        Ok(self
            .state
            .lock()
            .tenant_limits
            .iter()
            .filter(|limit| limit.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EntityDependencyStore for MemoryStore {
    async fn put_entity_dependency(&self, dependency: &EntityDependency) -> Result<()> {
        let mut state = self.state.lock();
        state
            .entity_dependencies
            .retain(|existing| existing.entity_type != dependency.entity_type);
        state.entity_dependencies.push(dependency.clone());
        Ok(())
    }

    async fn entity_dependencies(&self) -> Result<Vec<EntityDependency>> {
        let mut dependencies = self.state.lock().entity_dependencies.clone();
        dependencies.sort_by_key(|dep| dep.import_order);
        Ok(dependencies)
    }
}
