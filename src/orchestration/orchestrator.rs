use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::backoff::BackoffPolicy;
use super::plan::ImportPlan;
use super::progress::{ProgressReporter, PHASE_STEP};
use crate::collaborators::{ImportParser, Row, RowError, StagingArea};
use crate::config::{OrchestrationConfig, RetryConfig};
use crate::constants::{CANCELLED_REASON, SYSTEM_ACTOR};
use crate::dependency::DependencyResolver;
use crate::error::{FailureKind, ImportError, Result};
use crate::events::{EventPublisher, ImportEvent};
use crate::locks::LockManager;
use crate::models::{
    ExecutionStatus, ImportBatch, ImportPhase, ImportStatistics, Orchestration,
    ProgressTrackingEntry, QueueEntry, QueueStatus, ResourceKey,
};
use crate::queue::QueueManager;
use crate::rollback::{RollbackEngine, RollbackReport};
use crate::state_machine::{
    BatchStatus, OrchestrationEvent, OrchestrationStateMachine, OrchestrationStatus,
    StateMachineError,
};
use crate::store::OrchestrationStore;

/// How a run of one queue entry ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed {
        statistics: ImportStatistics,
    },
    Failed {
        reason: String,
        kind: FailureKind,
    },
    RolledBack {
        reason: String,
        kind: FailureKind,
        report: RollbackReport,
    },
    /// A prerequisite orchestration has not finished yet
    Deferred {
        waiting_on: Vec<Uuid>,
    },
    /// The entry was requeued and claimed again while this run was in
    /// flight; the current holder owns the orchestration from here
    ClaimLost {
        holder: Option<String>,
    },
}

impl RunOutcome {
    fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failed { kind, .. } | Self::RolledBack { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Terminal queue status for this outcome; `None` when the entry goes
    /// back to the queue or is no longer ours to settle
    pub fn queue_status(&self) -> Option<QueueStatus> {
        match self {
            Self::Deferred { .. } | Self::ClaimLost { .. } => None,
            Self::Completed { .. } => Some(QueueStatus::Completed),
            _ if self.kind() == Some(FailureKind::Cancelled) => Some(QueueStatus::Cancelled),
            _ => Some(QueueStatus::Failed),
        }
    }

    pub fn execution_status(&self) -> Option<ExecutionStatus> {
        match self.queue_status()? {
            QueueStatus::Completed => Some(ExecutionStatus::Completed),
            QueueStatus::Cancelled => Some(ExecutionStatus::Cancelled),
            _ => Some(ExecutionStatus::Failed),
        }
    }

    pub fn records_processed(&self) -> i64 {
        match self {
            Self::Completed { statistics } => statistics.imported,
            _ => 0,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Failed { reason, .. } | Self::RolledBack { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Per-run state that does not live on the orchestration record
struct RunContext {
    request_id: Uuid,
    batch_id: Uuid,
    plan: ImportPlan,
    row_errors: i64,
}

/// Drives one queue entry through validate, acquire locks, stage, promote
/// and finalize.
///
/// Every phase writes a phase-level progress entry; completed phases are
/// recorded on the orchestration so a re-dequeued request resumes where the
/// previous worker stopped.
#[derive(Clone)]
pub struct ImportOrchestrator {
    store: Arc<dyn OrchestrationStore>,
    state_machine: OrchestrationStateMachine,
    queue: QueueManager,
    locks: LockManager,
    resolver: Arc<DependencyResolver>,
    parser: Arc<dyn ImportParser>,
    staging: Arc<dyn StagingArea>,
    rollback: RollbackEngine,
    progress: ProgressReporter,
    events: EventPublisher,
    config: OrchestrationConfig,
    retry: RetryConfig,
}

impl std::fmt::Debug for ImportOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportOrchestrator")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ImportOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn OrchestrationStore>,
        queue: QueueManager,
        locks: LockManager,
        resolver: Arc<DependencyResolver>,
        parser: Arc<dyn ImportParser>,
        staging: Arc<dyn StagingArea>,
        rollback: RollbackEngine,
        events: EventPublisher,
        config: OrchestrationConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            state_machine: OrchestrationStateMachine::new(store.clone()),
            progress: ProgressReporter::new(store.clone(), events.clone()),
            store,
            queue,
            locks,
            resolver,
            parser,
            staging,
            rollback,
            events,
            config,
            retry,
        }
    }

    #[instrument(skip(self, entry), fields(request_id = %entry.request_id))]
    pub async fn run(&self, entry: &QueueEntry) -> Result<RunOutcome> {
        let orchestration_id = entry.orchestration_id.ok_or_else(|| {
            ImportError::validation(format!(
                "queue entry {} is not linked to an orchestration",
                entry.request_id
            ))
        })?;
        if let Some(lost) = self.lost_claim(entry).await? {
            return Ok(lost);
        }
        let mut orchestration = self
            .store
            .get_orchestration(orchestration_id)
            .await?
            .ok_or(ImportError::NotFound {
                entity: "orchestration",
                id: orchestration_id,
            })?;

        if orchestration.status.is_terminal() {
            info!(
                orchestration_id = %orchestration_id,
                status = %orchestration.status,
                "Orchestration already finished"
            );
            return self.terminal_outcome(&orchestration).await;
        }

        let batches = self.store.batches_for_orchestration(orchestration_id).await?;
        orchestration.request_id.get_or_insert(entry.request_id);

        let plan = match ImportPlan::from_configuration(&entry.import_type, &entry.configuration) {
            Ok(plan) => plan,
            Err(e) => {
                return self
                    .fail_with(&mut orchestration, &batches, ImportPhase::Validate, &e, 0)
                    .await
            }
        };

        if orchestration.status == OrchestrationStatus::Pending {
            match self.unfinished_prerequisites(orchestration_id).await {
                Ok(waiting_on) if !waiting_on.is_empty() => {
                    debug!(waiting_on = ?waiting_on, "Deferring until prerequisites finish");
                    return Ok(RunOutcome::Deferred { waiting_on });
                }
                Ok(_) => {}
                Err(e) => {
                    return self
                        .fail_with(&mut orchestration, &batches, ImportPhase::Validate, &e, 0)
                        .await
                }
            }
            orchestration.phase_details.batch_id = batches.first().map(|b| b.batch_id);
            self.state_machine
                .transition(&mut orchestration, OrchestrationEvent::Start)
                .await?;
            info!(orchestration_id = %orchestration_id, "Orchestration started");
        } else {
            info!(
                orchestration_id = %orchestration_id,
                completed_phases = ?orchestration.phase_details.completed_phases,
                "Resuming orchestration"
            );
        }

        let mut ctx = RunContext {
            request_id: orchestration.request_id.unwrap_or(entry.request_id),
            batch_id: orchestration
                .phase_details
                .batch_id
                .unwrap_or(orchestration_id),
            plan,
            row_errors: 0,
        };
        let timeout = ctx.plan.phase_timeout(self.config.default_phase_timeout());

        for phase in ImportPhase::ALL {
            if phase.is_resumable() && orchestration.phase_details.is_completed(phase) {
                debug!(phase = %phase, "Skipping committed phase");
                continue;
            }

            if let Some(lost) = self.lost_claim(entry).await? {
                return Ok(lost);
            }
            if self.queue.is_cancel_requested(entry.request_id).await? {
                info!(phase = %phase, "Cancellation observed at phase boundary");
                return self
                    .abort(
                        &mut orchestration,
                        &batches,
                        phase,
                        CANCELLED_REASON.to_string(),
                        FailureKind::Cancelled,
                        0,
                    )
                    .await;
            }

            if let Err(e) = self
                .run_phase(phase, &mut orchestration, &mut ctx, timeout)
                .await
            {
                if let Some(lost) = self.lost_claim(entry).await? {
                    return Ok(lost);
                }
                let row_errors = ctx.row_errors;
                return self
                    .fail_with(&mut orchestration, &batches, phase, &e, row_errors)
                    .await;
            }
        }

        if let Some(lost) = self.lost_claim(entry).await? {
            return Ok(lost);
        }
        self.complete(&mut orchestration, &batches).await
    }

    /// `Some` when the queue entry has been reclaimed since `entry` was
    /// dequeued. A cancel request keeps the claim: the cancel path settles it.
    async fn lost_claim(&self, entry: &QueueEntry) -> Result<Option<RunOutcome>> {
        let current = self.queue.get(entry.request_id).await?;
        match current {
            Some(current) if entry.same_claim(&current) => Ok(None),
            current => {
                let holder = current.and_then(|c| c.assigned_worker);
                warn!(
                    request_id = %entry.request_id,
                    worker_id = ?entry.assigned_worker,
                    holder = ?holder,
                    "Claim lost, abandoning run without settling"
                );
                Ok(Some(RunOutcome::ClaimLost { holder }))
            }
        }
    }

    /// Run one phase under its timeout, retrying transient failures locally
    async fn run_phase(
        &self,
        phase: ImportPhase,
        orchestration: &mut Orchestration,
        ctx: &mut RunContext,
        timeout: Duration,
    ) -> Result<()> {
        let backoff = BackoffPolicy::from_retry_config(&self.retry);
        let mut attempt = 0;

        loop {
            orchestration.phase_details.current_phase = Some(phase);
            self.persist(orchestration).await?;
            self.events.publish(ImportEvent::PhaseStarted {
                orchestration_id: orchestration.orchestration_id,
                phase,
            });

            let mut progress = self
                .progress
                .start(orchestration.orchestration_id, phase, PHASE_STEP, 0)
                .await?;

            let result = match tokio::time::timeout(
                timeout,
                self.execute_phase(phase, orchestration, ctx, &mut progress),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ImportError::PhaseTimeout {
                    phase: phase.as_str().to_string(),
                    timeout_seconds: timeout.as_secs(),
                }),
            };

            let error = match result {
                Ok(()) => {
                    self.progress.complete(&mut progress, None).await?;
                    orchestration.record_phase_success(phase);
                    self.persist(orchestration).await?;
                    self.events.publish(ImportEvent::PhaseCompleted {
                        orchestration_id: orchestration.orchestration_id,
                        phase,
                    });
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_transient_retries => {
                    let delay = backoff.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        phase = %phase,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient phase failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) if e.is_retryable() => ImportError::fatal(format!(
                    "phase {phase} failed after {attempt} transient retries: {e}"
                )),
                Err(e) => e,
            };

            if let Err(progress_err) = self.progress.fail(&mut progress, &error.to_string()).await {
                warn!(phase = %phase, error = %progress_err, "Failed to record phase failure");
            }
            return Err(error);
        }
    }

    async fn execute_phase(
        &self,
        phase: ImportPhase,
        orchestration: &mut Orchestration,
        ctx: &mut RunContext,
        progress: &mut ProgressTrackingEntry,
    ) -> Result<()> {
        match phase {
            ImportPhase::Validate => self.validate(orchestration, ctx, progress).await,
            ImportPhase::AcquireLocks => self.acquire_locks(orchestration, ctx, progress).await,
            ImportPhase::Stage => self.stage(orchestration, ctx, progress).await,
            ImportPhase::Promote => self.promote(orchestration, ctx, progress).await,
            ImportPhase::Finalize => self.finalize(orchestration, ctx, progress).await,
        }
    }

    /// Prerequisites present, every payload parses and every row validates.
    /// Nothing is locked or written yet.
    async fn validate(
        &self,
        orchestration: &mut Orchestration,
        ctx: &mut RunContext,
        progress: &mut ProgressTrackingEntry,
    ) -> Result<()> {
        let order = self.resolver.import_order(&ctx.plan.entity_types)?;
        progress.items_total = order.len() as i64;

        for entity_type in &order {
            for predecessor in self.resolver.required_predecessors(entity_type)? {
                if order.contains(&predecessor) {
                    continue;
                }
                if !self.staging.entity_present(&predecessor).await? {
                    return Err(ImportError::validation(format!(
                        "{entity_type} requires {predecessor}, which has not been imported"
                    )));
                }
            }
        }

        let mut row_errors: Vec<RowError> = Vec::new();
        for (index, entity_type) in order.iter().enumerate() {
            if let Err(errors) = self.parse_entity(&ctx.plan, entity_type) {
                row_errors.extend(errors);
            }
            self.progress.advance(progress, index as i64 + 1).await?;
        }

        if !row_errors.is_empty() {
            ctx.row_errors = row_errors.len() as i64;
            let sample: Vec<String> = row_errors.iter().take(5).map(ToString::to_string).collect();
            return Err(ImportError::validation(format!(
                "{} invalid rows: {}",
                row_errors.len(),
                sample.join("; ")
            )));
        }

        orchestration.phase_details.entity_order = order;
        Ok(())
    }

    /// One EXCLUSIVE lock per entity type, in dependency order
    async fn acquire_locks(
        &self,
        orchestration: &mut Orchestration,
        ctx: &mut RunContext,
        progress: &mut ProgressTrackingEntry,
    ) -> Result<()> {
        let keys: Vec<ResourceKey> = orchestration
            .phase_details
            .entity_order
            .iter()
            .map(|entity_type| ResourceKey::entity_type(entity_type.as_str()))
            .collect();
        progress.items_total = keys.len() as i64;

        let granted = self
            .locks
            .acquire_all(&keys, ctx.request_id, self.locks.default_ttl())
            .await?;

        orchestration.phase_details.lock_keys = keys.iter().map(ToString::to_string).collect();
        self.progress.advance(progress, granted.len() as i64).await
    }

    async fn stage(
        &self,
        orchestration: &mut Orchestration,
        ctx: &mut RunContext,
        progress: &mut ProgressTrackingEntry,
    ) -> Result<()> {
        let order = orchestration.phase_details.entity_order.clone();
        progress.items_total = order.len() as i64;

        for (index, entity_type) in order.iter().enumerate() {
            let rows = self.parse_entity(&ctx.plan, entity_type).map_err(|errors| {
                ImportError::fatal(format!(
                    "{entity_type} input no longer validates at staging ({} errors)",
                    errors.len()
                ))
            })?;

            let mut step = self
                .progress
                .start(orchestration.orchestration_id, ImportPhase::Stage, entity_type, rows.len() as i64)
                .await?;
            let staged = self.staging.stage(ctx.batch_id, entity_type, &rows).await?;
            self.progress.advance(&mut step, staged as i64).await?;
            self.progress
                .complete(&mut step, Some(format!("{staged} rows staged")))
                .await?;

            orchestration
                .phase_details
                .staged
                .insert(entity_type.clone(), staged as i64);
            self.progress.advance(progress, index as i64 + 1).await?;
        }
        Ok(())
    }

    /// Staging to master, one atomic promotion per entity type. The attempt
    /// is persisted before the write so a crash mid-promotion is compensated.
    async fn promote(
        &self,
        orchestration: &mut Orchestration,
        ctx: &mut RunContext,
        progress: &mut ProgressTrackingEntry,
    ) -> Result<()> {
        let order = orchestration.phase_details.entity_order.clone();
        progress.items_total = order.len() as i64;

        for (index, entity_type) in order.iter().enumerate() {
            if orchestration.phase_details.is_promoted(entity_type) {
                debug!(entity_type = %entity_type, "Already promoted");
                self.progress.advance(progress, index as i64 + 1).await?;
                continue;
            }

            orchestration.phase_details.record_promote_attempt(entity_type);
            self.persist(orchestration).await?;

            let expected = orchestration
                .phase_details
                .staged
                .get(entity_type)
                .copied()
                .unwrap_or(0);
            let mut step = self
                .progress
                .start(orchestration.orchestration_id, ImportPhase::Promote, entity_type, expected)
                .await?;

            let promoted = match self.staging.promote(ctx.batch_id, entity_type).await {
                Ok(promoted) => promoted,
                Err(e) => {
                    if let Err(progress_err) = self.progress.fail(&mut step, &e.to_string()).await {
                        warn!(error = %progress_err, "Failed to record promotion failure");
                    }
                    return Err(e);
                }
            };

            orchestration
                .phase_details
                .record_promoted(entity_type, promoted as i64);
            self.persist(orchestration).await?;
            self.progress
                .complete(&mut step, Some(format!("{promoted} rows promoted")))
                .await?;
            self.progress.advance(progress, index as i64 + 1).await?;
        }
        Ok(())
    }

    async fn finalize(
        &self,
        orchestration: &mut Orchestration,
        ctx: &mut RunContext,
        progress: &mut ProgressTrackingEntry,
    ) -> Result<()> {
        progress.items_total = 1;
        self.locks.release_all(ctx.request_id).await?;

        let details = &orchestration.phase_details;
        let statistics = ImportStatistics {
            imported: details.promoted_counts.values().sum(),
            errors: 0,
            staged: details.staged.values().sum(),
            per_entity: details.promoted_counts.clone(),
        };
        orchestration.statistics = statistics.to_value();
        self.progress.advance(progress, 1).await
    }

    async fn complete(
        &self,
        orchestration: &mut Orchestration,
        batches: &[ImportBatch],
    ) -> Result<RunOutcome> {
        self.state_machine
            .transition(orchestration, OrchestrationEvent::Complete)
            .await?;

        for batch in batches {
            self.store
                .finalize_batch(
                    batch.batch_id,
                    BatchStatus::Completed,
                    &orchestration.statistics,
                    None,
                    Utc::now(),
                )
                .await?;
        }

        let statistics = ImportStatistics::from_value(&orchestration.statistics);
        info!(
            orchestration_id = %orchestration.orchestration_id,
            imported = statistics.imported,
            "Orchestration completed"
        );
        self.events.publish(ImportEvent::OrchestrationFinished {
            orchestration_id: orchestration.orchestration_id,
            status: OrchestrationStatus::Completed,
        });
        Ok(RunOutcome::Completed { statistics })
    }

    async fn fail_with(
        &self,
        orchestration: &mut Orchestration,
        batches: &[ImportBatch],
        phase: ImportPhase,
        error: &ImportError,
        row_errors: i64,
    ) -> Result<RunOutcome> {
        self.abort(
            orchestration,
            batches,
            phase,
            error.to_string(),
            error.failure_kind(),
            row_errors,
        )
        .await
    }

    /// Terminate the run: FAILED, then compensation when anything may have
    /// reached the master tables or the failure is fatal
    async fn abort(
        &self,
        orchestration: &mut Orchestration,
        batches: &[ImportBatch],
        phase: ImportPhase,
        reason: String,
        kind: FailureKind,
        row_errors: i64,
    ) -> Result<RunOutcome> {
        let orchestration_id = orchestration.orchestration_id;
        error!(
            orchestration_id = %orchestration_id,
            phase = %phase,
            kind = kind.as_str(),
            reason = %reason,
            "Orchestration phase failed"
        );
        self.events.publish(ImportEvent::PhaseFailed {
            orchestration_id,
            phase,
            error: reason.clone(),
        });

        if orchestration.status == OrchestrationStatus::InProgress {
            orchestration.record_phase_error();
        }
        self.state_machine
            .transition(orchestration, OrchestrationEvent::Fail(reason.clone()))
            .await?;
        orchestration.error_details = Some(json!({
            "reason": reason,
            "kind": kind,
            "phase": phase,
            "row_errors": row_errors,
        }));
        self.persist(orchestration).await?;

        if kind == FailureKind::Fatal || orchestration.phase_details.has_partial_promotion() {
            match self.rollback.rollback(orchestration_id, &reason, SYSTEM_ACTOR).await {
                Ok(report) => return Ok(RunOutcome::RolledBack { reason, kind, report }),
                Err(e) => error!(
                    orchestration_id = %orchestration_id,
                    error = %e,
                    "Rollback failed, leaving orchestration FAILED"
                ),
            }
        }

        if let Some(owner) = orchestration.request_id {
            self.locks.release_all(owner).await?;
        }

        let statistics = ImportStatistics {
            imported: 0,
            errors: row_errors,
            staged: orchestration.phase_details.staged.values().sum(),
            per_entity: Default::default(),
        };
        for batch in batches {
            self.store
                .finalize_batch(
                    batch.batch_id,
                    BatchStatus::Failed,
                    &statistics.to_value(),
                    Some(&reason),
                    Utc::now(),
                )
                .await?;
        }

        self.events.publish(ImportEvent::OrchestrationFinished {
            orchestration_id,
            status: OrchestrationStatus::Failed,
        });
        Ok(RunOutcome::Failed { reason, kind })
    }

    /// Prerequisite orchestrations still pending or running. A prerequisite
    /// that failed or was rolled back is a validation error.
    async fn unfinished_prerequisites(&self, orchestration_id: Uuid) -> Result<Vec<Uuid>> {
        let mut waiting_on = Vec::new();
        for dependency in self.store.dependencies_of(orchestration_id).await? {
            let prerequisite_id = dependency.depends_on_orchestration_id;
            let prerequisite = self
                .store
                .get_orchestration(prerequisite_id)
                .await?
                .ok_or_else(|| {
                    ImportError::validation(format!(
                        "prerequisite orchestration {prerequisite_id} does not exist"
                    ))
                })?;

            match prerequisite.status {
                OrchestrationStatus::Completed => {}
                OrchestrationStatus::Failed | OrchestrationStatus::RolledBack => {
                    return Err(ImportError::validation(format!(
                        "prerequisite orchestration {prerequisite_id} ended {}",
                        prerequisite.status
                    )))
                }
                OrchestrationStatus::Pending | OrchestrationStatus::InProgress => {
                    waiting_on.push(prerequisite_id)
                }
            }
        }
        Ok(waiting_on)
    }

    async fn terminal_outcome(&self, orchestration: &Orchestration) -> Result<RunOutcome> {
        let details = orchestration.error_details.as_ref();
        let kind = details
            .and_then(|d| d.get("kind"))
            .and_then(|k| serde_json::from_value(k.clone()).ok())
            .unwrap_or(FailureKind::Fatal);
        let reason = details
            .and_then(|d| d.get("reason"))
            .and_then(|r| r.as_str())
            .map(str::to_string);

        Ok(match orchestration.status {
            OrchestrationStatus::Completed => RunOutcome::Completed {
                statistics: ImportStatistics::from_value(&orchestration.statistics),
            },
            OrchestrationStatus::RolledBack => {
                let reason = orchestration
                    .rollback_reason
                    .clone()
                    .or(reason)
                    .unwrap_or_default();
                let report = self
                    .rollback
                    .rollback(orchestration.orchestration_id, &reason, SYSTEM_ACTOR)
                    .await?;
                RunOutcome::RolledBack { reason, kind, report }
            }
            _ => RunOutcome::Failed {
                reason: reason.unwrap_or_else(|| "failed".to_string()),
                kind,
            },
        })
    }

    fn parse_entity(
        &self,
        plan: &ImportPlan,
        entity_type: &str,
    ) -> std::result::Result<Vec<Row>, Vec<RowError>> {
        let input = plan
            .payload(entity_type)
            .map_err(|e| vec![RowError::payload(e.to_string())])?;
        let rows = self.parser.parse(input)?;

        let errors: Vec<RowError> = rows
            .iter()
            .enumerate()
            .filter_map(|(index, row)| {
                self.parser.validate_row(row, entity_type).err().map(|errors| {
                    errors
                        .into_iter()
                        .map(move |mut e| {
                            if e.row == 0 {
                                e.row = index + 1;
                            }
                            e
                        })
                        .collect::<Vec<_>>()
                })
            })
            .flatten()
            .collect();

        if errors.is_empty() {
            Ok(rows)
        } else {
            Err(errors)
        }
    }

    async fn persist(&self, orchestration: &Orchestration) -> Result<()> {
        if self.store.update_orchestration(orchestration).await? {
            Ok(())
        } else {
            Err(StateMachineError::ConcurrentModification {
                entity: "orchestration",
                id: orchestration.orchestration_id.to_string(),
                expected: orchestration.status.to_string(),
            }
            .into())
        }
    }
}
