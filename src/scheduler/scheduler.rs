use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::cron_schedule::ScheduleExpression;
use crate::config::SchedulerConfig;
use crate::constants::{MAX_PRIORITY, MIN_PRIORITY};
use crate::error::{ImportError, Result};
use crate::events::{EventPublisher, ImportEvent};
use crate::logging::log_schedule_operation;
use crate::models::{
    ExecutionStatus, ReservationStatus, ResourceReservation, ScheduleDefinition,
    ScheduleExecutionHistory, ScheduleStatus, ScheduledImport,
};
use crate::orchestration::{ImportIntake, ImportSubmission, SubmissionReceipt};
use crate::queue::TenantGovernor;
use crate::store::ScheduleStore;

const MAX_SAVE_ATTEMPTS: usize = 5;

/// Where a firing sends its import
#[async_trait]
pub trait ImportSubmitter: Send + Sync {
    async fn submit(&self, submission: ImportSubmission) -> Result<SubmissionReceipt>;
}

#[async_trait]
impl ImportSubmitter for ImportIntake {
    async fn submit(&self, submission: ImportSubmission) -> Result<SubmissionReceipt> {
        ImportIntake::submit(self, submission).await
    }
}

/// Result of one due schedule during a tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FireOutcome {
    Submitted {
        schedule_id: Uuid,
        execution_id: Uuid,
        request_id: Uuid,
    },
    /// A HARD tenant limit refused the reservation; the schedule was moved
    /// to its next occurrence
    Rejected {
        schedule_id: Uuid,
        execution_id: Uuid,
        reason: String,
    },
    /// The import could not be submitted; recorded as a failed execution
    SubmitFailed {
        schedule_id: Uuid,
        execution_id: Uuid,
        reason: String,
    },
    /// Another ticker fired this occurrence first
    Skipped { schedule_id: Uuid },
}

/// Creates, fires and accounts for scheduled imports
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn ScheduleStore>,
    governor: TenantGovernor,
    submitter: Arc<dyn ImportSubmitter>,
    config: SchedulerConfig,
    events: EventPublisher,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        governor: TenantGovernor,
        submitter: Arc<dyn ImportSubmitter>,
        config: SchedulerConfig,
        events: EventPublisher,
    ) -> Self {
        Self {
            store,
            governor,
            submitter,
            config,
            events,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[instrument(skip(self, definition), fields(name = %definition.name))]
    pub async fn create_schedule(&self, definition: ScheduleDefinition) -> Result<Uuid> {
        let now = Utc::now();
        let expression = Self::validate_definition(&definition)?;

        let next_execution_at = match definition.start_at {
            Some(start_at) => Some(start_at),
            None => expression.next_after(now),
        };
        if next_execution_at.is_none() {
            return Err(ImportError::Schedule(format!(
                "schedule expression '{}' never fires",
                definition.schedule_expression
            )));
        }

        let schedule = ScheduledImport {
            schedule_id: Uuid::new_v4(),
            name: definition.name,
            import_type: definition.import_type,
            tenant_id: definition.tenant_id,
            requester: definition.requester,
            schedule_expression: definition.schedule_expression,
            recurring: definition.recurring,
            priority: definition.priority,
            status: ScheduleStatus::Scheduled,
            next_execution_at,
            last_execution_at: None,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            import_configuration: definition.import_configuration,
            resource_requirements: definition.resource_requirements,
            expected_duration_minutes: definition
                .expected_duration_minutes
                .unwrap_or(self.config.default_expected_duration_minutes),
            max_retries: definition.max_retries,
            retry_delay_minutes: definition.retry_delay_minutes,
            timeout_minutes: definition.timeout_minutes,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_schedule(&schedule).await?;

        log_schedule_operation(
            "create",
            schedule.schedule_id,
            schedule.status.as_str(),
            schedule.next_execution_at.map(|t| t.to_rfc3339()).as_deref(),
        );
        Ok(schedule.schedule_id)
    }

    fn validate_definition(definition: &ScheduleDefinition) -> Result<ScheduleExpression> {
        let mut problems = Vec::new();
        if definition.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
        }
        if definition.import_type.trim().is_empty() {
            problems.push("import type must not be empty".to_string());
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&definition.priority) {
            problems.push(format!(
                "priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}"
            ));
        }
        if definition.expected_duration_minutes.is_some_and(|m| m <= 0) {
            problems.push("expected_duration_minutes must be positive".to_string());
        }
        if definition.timeout_minutes.is_some_and(|m| m <= 0) {
            problems.push("timeout_minutes must be positive".to_string());
        }
        if definition.max_retries < 0 || definition.retry_delay_minutes < 0 {
            problems.push("retry policy must not be negative".to_string());
        }
        if definition.resource_requirements.values().any(|amount| *amount <= 0.0) {
            problems.push("reserved amounts must be positive".to_string());
        }
        if !matches!(definition.import_configuration, Value::Null | Value::Object(_)) {
            problems.push("import configuration must be an object".to_string());
        }
        if !problems.is_empty() {
            return Err(ImportError::validation(problems.join("; ")));
        }

        let expression = ScheduleExpression::parse(&definition.schedule_expression)?;
        if expression.is_once() && definition.recurring {
            return Err(ImportError::Schedule(
                "a one-shot schedule cannot be recurring".into(),
            ));
        }
        if expression.is_once() && definition.start_at.is_none() {
            return Err(ImportError::Schedule(
                "a one-shot schedule needs start_at".into(),
            ));
        }
        Ok(expression)
    }

    /// Fire every due schedule. A failure on one schedule is logged and does
    /// not stop the others.
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<FireOutcome>> {
        let due = self.store.due_schedules(now).await?;
        let mut outcomes = Vec::with_capacity(due.len());
        for schedule in due {
            let schedule_id = schedule.schedule_id;
            match self.fire(schedule, now).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(schedule_id = %schedule_id, error = %e, "Schedule firing failed"),
            }
        }
        Ok(outcomes)
    }

    async fn fire(&self, schedule: ScheduledImport, now: DateTime<Utc>) -> Result<FireOutcome> {
        let schedule_id = schedule.schedule_id;
        let execution_id = Uuid::new_v4();
        let reserved_until = now + Duration::minutes(schedule.expected_duration_minutes.max(1));

        if let Err(e) = self.check_reservation(&schedule, now, reserved_until).await {
            return match e {
                ImportError::ResourceLimitExceeded { .. } => {
                    self.reject(schedule, execution_id, e.to_string(), now).await
                }
                other => Err(other),
            };
        }

        let mut claimed = schedule.clone();
        claimed.execution_count += 1;
        claimed.last_execution_at = Some(now);
        claimed.next_execution_at = None;
        claimed.updated_at = now;
        if !self
            .store
            .save_schedule(&claimed, schedule.status, schedule.execution_count)
            .await?
        {
            return Ok(FireOutcome::Skipped { schedule_id });
        }

        for (resource_type, amount) in &schedule.resource_requirements {
            self.store
                .insert_reservation(&ResourceReservation {
                    reservation_id: Uuid::new_v4(),
                    schedule_id,
                    execution_id: Some(execution_id),
                    tenant_id: schedule.tenant_id.clone(),
                    resource_type: resource_type.clone(),
                    amount: *amount,
                    reserved_from: now,
                    reserved_until,
                    status: ReservationStatus::Reserved,
                })
                .await?;
        }

        let mut execution = ScheduleExecutionHistory {
            execution_id,
            schedule_id,
            request_id: None,
            started_at: now,
            completed_at: None,
            status: ExecutionStatus::Started,
            records_processed: 0,
            error_message: None,
            execution_details: json!({
                "execution_number": claimed.execution_count,
                "reserved_until": reserved_until,
            }),
        };
        self.store.insert_execution(&execution).await?;

        match self.submitter.submit(Self::submission(&schedule, execution_id)).await {
            Ok(receipt) => {
                execution.request_id = Some(receipt.request_id);
                execution.execution_details["batch_id"] = json!(receipt.batch_id);
                execution.execution_details["orchestration_id"] = json!(receipt.orchestration_id);
                self.store.update_execution(&execution).await?;

                log_schedule_operation("fire", schedule_id, "STARTED", Some(&receipt.request_id.to_string()));
                self.events.publish(ImportEvent::ScheduleFired {
                    schedule_id,
                    execution_id,
                    request_id: Some(receipt.request_id),
                });
                Ok(FireOutcome::Submitted {
                    schedule_id,
                    execution_id,
                    request_id: receipt.request_id,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(schedule_id = %schedule_id, error = %reason, "Scheduled import rejected at submission");
                self.handle_completion(execution_id, ExecutionStatus::Failed, 0, Some(&reason), now)
                    .await?;
                Ok(FireOutcome::SubmitFailed {
                    schedule_id,
                    execution_id,
                    reason,
                })
            }
        }
    }

    /// Reservations overlapping the firing window plus this firing's amounts
    /// must stay within the tenant's limits
    async fn check_reservation(
        &self,
        schedule: &ScheduledImport,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<()> {
        if schedule.resource_requirements.is_empty() {
            return Ok(());
        }
        let limits = self.governor.limits_for(&schedule.tenant_id).await?;
        let mut reserved = HashMap::new();
        for limit in &limits {
            if schedule.resource_requirements.contains_key(&limit.resource_type) {
                let amount = self
                    .store
                    .reserved_amount(&schedule.tenant_id, &limit.resource_type, from, until)
                    .await?;
                reserved.insert(limit.resource_type.clone(), amount);
            }
        }
        TenantGovernor::enforce(
            &schedule.tenant_id,
            &limits,
            &schedule.resource_requirements,
            |resource_type| reserved.get(resource_type).copied().unwrap_or(0.0),
        )
    }

    /// Record a refused firing and move the schedule to its next slot
    /// without touching the counters
    async fn reject(
        &self,
        schedule: ScheduledImport,
        execution_id: Uuid,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<FireOutcome> {
        let schedule_id = schedule.schedule_id;
        let mut rescheduled = schedule.clone();
        rescheduled.next_execution_at = if schedule.recurring {
            ScheduleExpression::parse(&schedule.schedule_expression)?.next_after(now)
        } else {
            Some(now + Duration::minutes(schedule.retry_delay_minutes.max(1)))
        };
        rescheduled.updated_at = now;
        if !self
            .store
            .save_schedule(&rescheduled, schedule.status, schedule.execution_count)
            .await?
        {
            return Ok(FireOutcome::Skipped { schedule_id });
        }

        self.store
            .insert_execution(&ScheduleExecutionHistory {
                execution_id,
                schedule_id,
                request_id: None,
                started_at: now,
                completed_at: Some(now),
                status: ExecutionStatus::Rejected,
                records_processed: 0,
                error_message: Some(reason.clone()),
                execution_details: json!({ "next_execution_at": rescheduled.next_execution_at }),
            })
            .await?;

        log_schedule_operation("reject", schedule_id, "REJECTED", Some(&reason));
        self.events.publish(ImportEvent::ScheduleRejected {
            schedule_id,
            reason: reason.clone(),
        });
        Ok(FireOutcome::Rejected {
            schedule_id,
            execution_id,
            reason,
        })
    }

    fn submission(schedule: &ScheduledImport, execution_id: Uuid) -> ImportSubmission {
        let mut configuration = match &schedule.import_configuration {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        if let Some(minutes) = schedule.timeout_minutes {
            configuration.insert("phase_timeout_seconds".into(), json!(minutes * 60));
        }

        ImportSubmission {
            import_type: schedule.import_type.clone(),
            source_descriptor: format!("schedule:{}", schedule.name),
            priority: schedule.priority,
            requester: schedule.requester.clone(),
            tenant_id: schedule.tenant_id.clone(),
            configuration: Value::Object(configuration),
            resource_requirements: schedule.resource_requirements.clone(),
            estimated_duration_seconds: Some(schedule.expected_duration_minutes * 60),
            prerequisites: Vec::new(),
            schedule_id: Some(schedule.schedule_id),
            execution_id: Some(execution_id),
        }
    }

    /// The import of this execution was picked up by a worker
    pub async fn execution_started(&self, execution_id: Uuid) -> Result<()> {
        self.store
            .set_reservation_status(execution_id, ReservationStatus::Active)
            .await?;
        Ok(())
    }

    /// Account for the terminal outcome of one execution. Repeated calls for
    /// the same execution are ignored.
    #[instrument(skip(self, error_message))]
    pub async fn handle_completion(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        records_processed: i64,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !matches!(
            status,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        ) {
            return Err(ImportError::validation(format!(
                "execution cannot finish as {status}"
            )));
        }

        let mut execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(ImportError::NotFound {
                entity: "schedule execution",
                id: execution_id,
            })?;
        if execution.status.is_terminal() {
            return Ok(());
        }

        execution.status = status;
        execution.completed_at = Some(now);
        execution.records_processed = records_processed;
        execution.error_message = error_message.map(str::to_string);
        self.store.update_execution(&execution).await?;

        let overran = self
            .store
            .reservations_for(execution.schedule_id)
            .await?
            .iter()
            .any(|r| r.execution_id == Some(execution_id) && r.reserved_until < now);
        let reservation_status = if overran {
            ReservationStatus::Expired
        } else {
            ReservationStatus::Released
        };
        self.store
            .set_reservation_status(execution_id, reservation_status)
            .await?;

        self.account(execution.schedule_id, status, now).await?;

        log_schedule_operation("complete", execution.schedule_id, status.as_str(), error_message);
        self.events.publish(ImportEvent::ScheduleExecutionFinished {
            schedule_id: execution.schedule_id,
            execution_id,
            status,
        });
        Ok(())
    }

    /// Counters and next occurrence, saved with a compare-and-set retry loop
    async fn account(&self, schedule_id: Uuid, status: ExecutionStatus, now: DateTime<Utc>) -> Result<()> {
        for _ in 0..MAX_SAVE_ATTEMPTS {
            let current = self.load(schedule_id).await?;
            let mut next = current.clone();
            next.updated_at = now;

            let failures_before = current.failure_count;
            match status {
                ExecutionStatus::Completed => next.success_count += 1,
                ExecutionStatus::Failed => next.failure_count += 1,
                _ => {}
            }

            if current.status == ScheduleStatus::Scheduled {
                if status == ExecutionStatus::Failed && failures_before < current.max_retries {
                    next.next_execution_at =
                        Some(now + Duration::minutes(current.retry_delay_minutes));
                    info!(
                        schedule_id = %schedule_id,
                        retry = failures_before + 1,
                        max_retries = current.max_retries,
                        "Scheduling retry"
                    );
                } else if status == ExecutionStatus::Failed {
                    next.status = ScheduleStatus::Failed;
                    next.next_execution_at = None;
                    warn!(schedule_id = %schedule_id, "Retries exhausted, schedule FAILED");
                } else if current.recurring {
                    next.next_execution_at =
                        ScheduleExpression::parse(&current.schedule_expression)?.next_after(now);
                    if next.next_execution_at.is_none() {
                        next.status = ScheduleStatus::Completed;
                    }
                } else {
                    next.status = ScheduleStatus::Completed;
                    next.next_execution_at = None;
                }
            }

            if self
                .store
                .save_schedule(&next, current.status, current.execution_count)
                .await?
            {
                return Ok(());
            }
        }
        Err(ImportError::transient(
            "schedule accounting",
            format!("schedule {schedule_id} kept changing concurrently"),
        ))
    }

    pub async fn pause(&self, schedule_id: Uuid) -> Result<ScheduledImport> {
        self.change_status(schedule_id, ScheduleStatus::Paused, |s| {
            s.status == ScheduleStatus::Scheduled
        })
        .await
    }

    /// Back to `SCHEDULED`; an occurrence missed while paused fires on the
    /// next tick
    pub async fn resume(&self, schedule_id: Uuid) -> Result<ScheduledImport> {
        let in_flight = self
            .store
            .executions_for(schedule_id)
            .await?
            .iter()
            .any(|e| e.status == ExecutionStatus::Started);
        let now = Utc::now();
        let mut schedule = self.load(schedule_id).await?;
        if schedule.status != ScheduleStatus::Paused {
            return Err(ImportError::Schedule(format!(
                "schedule {schedule_id} is {}, not PAUSED",
                schedule.status
            )));
        }

        let expected = schedule.status;
        schedule.status = ScheduleStatus::Scheduled;
        schedule.updated_at = now;
        if schedule.next_execution_at.is_none() && !in_flight {
            schedule.next_execution_at = if schedule.recurring {
                ScheduleExpression::parse(&schedule.schedule_expression)?.next_after(now)
            } else if schedule.execution_count == 0 {
                Some(now)
            } else {
                None
            };
        }
        self.save(&schedule, expected).await?;
        log_schedule_operation("resume", schedule_id, schedule.status.as_str(), None);
        Ok(schedule)
    }

    pub async fn cancel(&self, schedule_id: Uuid) -> Result<ScheduledImport> {
        self.change_status(schedule_id, ScheduleStatus::Cancelled, |s| {
            matches!(s.status, ScheduleStatus::Scheduled | ScheduleStatus::Paused)
        })
        .await
    }

    async fn change_status<F>(
        &self,
        schedule_id: Uuid,
        target: ScheduleStatus,
        allowed: F,
    ) -> Result<ScheduledImport>
    where
        F: Fn(&ScheduledImport) -> bool,
    {
        let mut schedule = self.load(schedule_id).await?;
        if !allowed(&schedule) {
            return Err(ImportError::Schedule(format!(
                "schedule {schedule_id} cannot move from {} to {target}",
                schedule.status
            )));
        }
        let expected = schedule.status;
        schedule.status = target;
        if target == ScheduleStatus::Cancelled {
            schedule.next_execution_at = None;
        }
        schedule.updated_at = Utc::now();
        self.save(&schedule, expected).await?;
        log_schedule_operation("status", schedule_id, target.as_str(), None);
        Ok(schedule)
    }

    async fn save(&self, schedule: &ScheduledImport, expected: ScheduleStatus) -> Result<()> {
        if self
            .store
            .save_schedule(schedule, expected, schedule.execution_count)
            .await?
        {
            Ok(())
        } else {
            Err(ImportError::Schedule(format!(
                "schedule {} changed concurrently",
                schedule.schedule_id
            )))
        }
    }

    async fn load(&self, schedule_id: Uuid) -> Result<ScheduledImport> {
        self.store
            .get_schedule(schedule_id)
            .await?
            .ok_or(ImportError::NotFound {
                entity: "schedule",
                id: schedule_id,
            })
    }

    pub async fn get_schedule(&self, schedule_id: Uuid) -> Result<Option<ScheduledImport>> {
        self.store.get_schedule(schedule_id).await
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduledImport>> {
        self.store.list_schedules().await
    }

    pub async fn execution_history(&self, schedule_id: Uuid) -> Result<Vec<ScheduleExecutionHistory>> {
        self.store.executions_for(schedule_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnforcementLevel, TenantResourceLimit};
    use crate::store::{MemoryStore, TenantLimitStore};
    use parking_lot::Mutex;

    /// Records submissions instead of creating imports
    #[derive(Default)]
    struct RecordingSubmitter {
        submissions: Mutex<Vec<ImportSubmission>>,
        fail: bool,
    }

    #[async_trait]
    impl ImportSubmitter for RecordingSubmitter {
        async fn submit(&self, submission: ImportSubmission) -> Result<SubmissionReceipt> {
            if self.fail {
                return Err(ImportError::validation("queue refused"));
            }
            self.submissions.lock().push(submission);
            Ok(SubmissionReceipt {
                batch_id: Uuid::new_v4(),
                orchestration_id: Uuid::new_v4(),
                request_id: Uuid::new_v4(),
                queue_position: 1,
            })
        }
    }

    fn scheduler(store: Arc<MemoryStore>, submitter: Arc<RecordingSubmitter>) -> Scheduler {
        Scheduler::new(
            store.clone(),
            TenantGovernor::new(store),
            submitter,
            SchedulerConfig::default(),
            EventPublisher::default(),
        )
    }

    fn definition(expression: &str, recurring: bool) -> ScheduleDefinition {
        ScheduleDefinition {
            name: "nightly teams".into(),
            import_type: "Teams".into(),
            tenant_id: "acme".into(),
            requester: "ops".into(),
            schedule_expression: expression.into(),
            recurring,
            priority: 5,
            start_at: None,
            import_configuration: Value::Null,
            resource_requirements: Default::default(),
            expected_duration_minutes: Some(10),
            max_retries: 0,
            retry_delay_minutes: 5,
            timeout_minutes: Some(2),
        }
    }

    /// Create a schedule and make it due right away
    async fn due_schedule(scheduler: &Scheduler, definition: ScheduleDefinition) -> (Uuid, DateTime<Utc>) {
        let start = Utc::now();
        let id = scheduler
            .create_schedule(ScheduleDefinition {
                start_at: Some(start),
                ..definition
            })
            .await
            .unwrap();
        (id, start + Duration::seconds(1))
    }

    #[tokio::test]
    async fn test_definition_validation() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store, Arc::new(RecordingSubmitter::default()));

        assert!(matches!(
            scheduler.create_schedule(definition("not a cron", true)).await,
            Err(ImportError::Schedule(_))
        ));
        assert!(matches!(
            scheduler.create_schedule(definition(crate::scheduler::cron_schedule::ONCE, true)).await,
            Err(ImportError::Schedule(_))
        ));
        assert!(matches!(
            scheduler.create_schedule(definition(crate::scheduler::cron_schedule::ONCE, false)).await,
            Err(ImportError::Schedule(_))
        ));
        let mut bad_priority = definition("0 2 * * *", true);
        bad_priority.priority = 0;
        assert!(matches!(
            scheduler.create_schedule(bad_priority).await,
            Err(ImportError::Validation(_))
        ));

        let id = scheduler.create_schedule(definition("0 2 * * *", true)).await.unwrap();
        let schedule = scheduler.get_schedule(id).await.unwrap().unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Scheduled);
        assert!(schedule.next_execution_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_tick_submits_and_reserves() {
        let store = Arc::new(MemoryStore::new());
        let submitter = Arc::new(RecordingSubmitter::default());
        let scheduler = scheduler(store.clone(), submitter.clone());

        let mut def = definition("0 2 * * *", true);
        def.resource_requirements.insert("db_connections".into(), 2.0);
        let (id, now) = due_schedule(&scheduler, def).await;

        let outcomes = scheduler.tick(now).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        let FireOutcome::Submitted { execution_id, .. } = outcomes[0] else {
            panic!("expected submission, got {:?}", outcomes[0]);
        };

        let schedule = scheduler.get_schedule(id).await.unwrap().unwrap();
        assert_eq!(schedule.execution_count, 1);
        assert_eq!(schedule.next_execution_at, None);

        let submissions = submitter.submissions.lock().clone();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].configuration["phase_timeout_seconds"], json!(120));
        assert_eq!(submissions[0].execution_id, Some(execution_id));

        let reservations = store.reservations_for(id).await.unwrap();
        assert_eq!(reservations.len(), 1);
        assert_eq!(reservations[0].status, ReservationStatus::Reserved);

        // Already claimed: a second tick finds nothing due
        assert!(scheduler.tick(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completion_accounts_once_and_reschedules() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store.clone(), Arc::new(RecordingSubmitter::default()));
        let (id, now) = due_schedule(&scheduler, definition("0 2 * * *", true)).await;

        let outcomes = scheduler.tick(now).await.unwrap();
        let FireOutcome::Submitted { execution_id, .. } = outcomes[0] else {
            panic!("expected submission");
        };

        scheduler
            .handle_completion(execution_id, ExecutionStatus::Completed, 42, None, now)
            .await
            .unwrap();
        scheduler
            .handle_completion(execution_id, ExecutionStatus::Completed, 42, None, now)
            .await
            .unwrap();

        let schedule = scheduler.get_schedule(id).await.unwrap().unwrap();
        assert_eq!(schedule.success_count, 1);
        assert_eq!(schedule.status, ScheduleStatus::Scheduled);
        assert!(schedule.next_execution_at.unwrap() > now);

        let history = scheduler.execution_history(id).await.unwrap();
        assert_eq!(history[0].status, ExecutionStatus::Completed);
        assert_eq!(history[0].records_processed, 42);
    }

    #[tokio::test]
    async fn test_failures_retry_then_fail_schedule() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store.clone(), Arc::new(RecordingSubmitter::default()));
        let mut def = definition("0 2 * * *", true);
        def.max_retries = 1;
        let (id, now) = due_schedule(&scheduler, def).await;

        let FireOutcome::Submitted { execution_id, .. } = scheduler.tick(now).await.unwrap()[0] else {
            panic!("expected submission");
        };
        scheduler
            .handle_completion(execution_id, ExecutionStatus::Failed, 0, Some("boom"), now)
            .await
            .unwrap();

        let schedule = scheduler.get_schedule(id).await.unwrap().unwrap();
        assert_eq!(schedule.failure_count, 1);
        assert_eq!(schedule.next_execution_at, Some(now + Duration::minutes(5)));

        let retry_at = now + Duration::minutes(5);
        let FireOutcome::Submitted { execution_id, .. } = scheduler.tick(retry_at).await.unwrap()[0] else {
            panic!("expected retry submission");
        };
        scheduler
            .handle_completion(execution_id, ExecutionStatus::Failed, 0, Some("boom"), retry_at)
            .await
            .unwrap();

        let schedule = scheduler.get_schedule(id).await.unwrap().unwrap();
        assert_eq!(schedule.failure_count, 2);
        assert_eq!(schedule.status, ScheduleStatus::Failed);
        assert_eq!(schedule.next_execution_at, None);
    }

    #[tokio::test]
    async fn test_hard_limit_rejects_firing() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_limit(&TenantResourceLimit::new("acme", "db_connections", 2.0, EnforcementLevel::Hard))
            .await
            .unwrap();
        let submitter = Arc::new(RecordingSubmitter::default());
        let scheduler = scheduler(store.clone(), submitter.clone());

        let mut def = definition("0 2 * * *", true);
        def.resource_requirements.insert("db_connections".into(), 3.0);
        let (id, now) = due_schedule(&scheduler, def).await;

        let outcomes = scheduler.tick(now).await.unwrap();
        assert!(matches!(outcomes[0], FireOutcome::Rejected { .. }));
        assert!(submitter.submissions.lock().is_empty());

        let schedule = scheduler.get_schedule(id).await.unwrap().unwrap();
        assert_eq!(schedule.execution_count, 0);
        assert!(schedule.next_execution_at.unwrap() > now);

        let history = scheduler.execution_history(id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Rejected);
    }

    #[tokio::test]
    async fn test_submit_failure_counts_as_failed_execution() {
        let store = Arc::new(MemoryStore::new());
        let submitter = Arc::new(RecordingSubmitter {
            fail: true,
            ..Default::default()
        });
        let scheduler = scheduler(store.clone(), submitter);
        let (id, now) = due_schedule(&scheduler, definition("0 2 * * *", false)).await;

        let outcomes = scheduler.tick(now).await.unwrap();
        assert!(matches!(outcomes[0], FireOutcome::SubmitFailed { .. }));

        let schedule = scheduler.get_schedule(id).await.unwrap().unwrap();
        assert_eq!(schedule.failure_count, 1);
        assert_eq!(schedule.status, ScheduleStatus::Failed);
    }

    #[tokio::test]
    async fn test_pause_resume_cancel() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store, Arc::new(RecordingSubmitter::default()));
        let id = scheduler.create_schedule(definition("0 2 * * *", true)).await.unwrap();

        assert_eq!(scheduler.pause(id).await.unwrap().status, ScheduleStatus::Paused);
        assert!(scheduler.pause(id).await.is_err());
        assert!(scheduler.tick(Utc::now() + Duration::days(2)).await.unwrap().is_empty());

        let resumed = scheduler.resume(id).await.unwrap();
        assert_eq!(resumed.status, ScheduleStatus::Scheduled);
        assert!(resumed.next_execution_at.is_some());

        let cancelled = scheduler.cancel(id).await.unwrap();
        assert_eq!(cancelled.status, ScheduleStatus::Cancelled);
        assert_eq!(cancelled.next_execution_at, None);
        assert!(scheduler.resume(id).await.is_err());
    }
}
