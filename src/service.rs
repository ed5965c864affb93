//! # Import Service
//!
//! Caller-facing facade wiring every component onto one backing store.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use import_orchestrator::collaborators::{DelimitedParser, InMemoryStagingArea};
//! use import_orchestrator::config::ImportConfig;
//! use import_orchestrator::dependency::DependencyResolver;
//! use import_orchestrator::models::EntityDependency;
//! use import_orchestrator::orchestration::ImportSubmission;
//! use import_orchestrator::service::ImportService;
//! use import_orchestrator::store::MemoryStore;
//!
//! # async fn example() -> import_orchestrator::error::Result<()> {
//! let resolver = DependencyResolver::new(vec![EntityDependency::root("Teams", 1)])?;
//! let service = ImportService::new(
//!     Arc::new(MemoryStore::new()),
//!     resolver,
//!     Arc::new(DelimitedParser::new()),
//!     Arc::new(InMemoryStagingArea::new()),
//!     ImportConfig::default(),
//! )?;
//!
//! let receipt = service
//!     .submit(ImportSubmission {
//!         import_type: "Teams".into(),
//!         source_descriptor: "upload://teams.csv".into(),
//!         priority: 10,
//!         requester: "alice".into(),
//!         tenant_id: "acme".into(),
//!         ..Default::default()
//!     })
//!     .await?;
//! let report = service.status(receipt.batch_id).await?;
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::collaborators::{ImportParser, StagingArea};
use crate::config::ImportConfig;
use crate::constants::CANCELLED_REASON;
use crate::dependency::DependencyResolver;
use crate::error::{FailureKind, ImportError, Result};
use crate::events::EventPublisher;
use crate::locks::LockManager;
use crate::models::{CancelOutcome, ExecutionStatus};
use crate::orchestration::{
    overall_percentage, ImportIntake, ImportOrchestrator, ImportSubmission, ImportWorker,
    SubmissionReceipt, WorkerPool,
};
use crate::queue::{QueueManager, TenantGovernor};
use crate::rollback::{RollbackEngine, RollbackReport};
use crate::scheduler::Scheduler;
use crate::state_machine::{
    BatchStatus, OrchestrationEvent, OrchestrationStateMachine, OrchestrationStatus,
};
use crate::store::{ImportStore, OrchestrationStore};

/// What a caller polls for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportStatusReport {
    pub batch_id: Uuid,
    pub orchestration_id: Option<Uuid>,
    pub status: BatchStatus,
    pub orchestration_status: Option<OrchestrationStatus>,
    pub queue_position: Option<i32>,
    pub progress_percentage: f64,
    pub statistics: Value,
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct ImportService {
    store: Arc<dyn OrchestrationStore>,
    state_machine: OrchestrationStateMachine,
    config: ImportConfig,
    events: EventPublisher,
    resolver: Arc<DependencyResolver>,
    queue: QueueManager,
    locks: LockManager,
    intake: ImportIntake,
    orchestrator: ImportOrchestrator,
    rollback: RollbackEngine,
    scheduler: Scheduler,
}

impl std::fmt::Debug for ImportService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ImportService {
    pub fn new<S>(
        store: Arc<S>,
        resolver: DependencyResolver,
        parser: Arc<dyn ImportParser>,
        staging: Arc<dyn StagingArea>,
        config: ImportConfig,
    ) -> Result<Self>
    where
        S: ImportStore + 'static,
    {
        config.validate()?;

        let events = EventPublisher::default();
        let resolver = Arc::new(resolver);
        let governor = TenantGovernor::new(store.clone());
        let queue = QueueManager::new(
            store.clone(),
            governor.clone(),
            config.queue.clone(),
            events.clone(),
        );
        let locks = LockManager::new(store.clone(), config.locks.clone(), events.clone());
        let rollback = RollbackEngine::new(
            store.clone(),
            store.clone(),
            locks.clone(),
            staging.clone(),
            resolver.clone(),
            events.clone(),
        );
        let orchestrator = ImportOrchestrator::new(
            store.clone(),
            queue.clone(),
            locks.clone(),
            resolver.clone(),
            parser,
            staging,
            rollback.clone(),
            events.clone(),
            config.orchestration.clone(),
            config.retry.clone(),
        );
        let intake = ImportIntake::new(store.clone(), queue.clone(), config.orchestration.phase_count);
        let scheduler = Scheduler::new(
            store.clone(),
            governor,
            Arc::new(intake.clone()),
            config.scheduler.clone(),
            events.clone(),
        );

        Ok(Self {
            state_machine: OrchestrationStateMachine::new(store.clone()),
            store,
            config,
            events,
            resolver,
            queue,
            locks,
            intake,
            orchestrator,
            rollback,
            scheduler,
        })
    }

    /// Build with the entity dependency graph stored alongside the data
    pub async fn from_store<S>(
        store: Arc<S>,
        parser: Arc<dyn ImportParser>,
        staging: Arc<dyn StagingArea>,
        config: ImportConfig,
    ) -> Result<Self>
    where
        S: ImportStore + 'static,
    {
        let resolver = DependencyResolver::new(store.entity_dependencies().await?)?;
        Self::new(store, resolver, parser, staging, config)
    }

    pub async fn submit(&self, submission: ImportSubmission) -> Result<SubmissionReceipt> {
        self.intake.submit(submission).await
    }

    #[instrument(skip(self))]
    pub async fn status(&self, batch_id: Uuid) -> Result<ImportStatusReport> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or(ImportError::NotFound {
                entity: "batch",
                id: batch_id,
            })?;

        let orchestration = match batch.orchestration_id {
            Some(id) => self.store.get_orchestration(id).await?,
            None => None,
        };

        let mut report = ImportStatusReport {
            batch_id,
            orchestration_id: batch.orchestration_id,
            status: batch.status,
            orchestration_status: orchestration.as_ref().map(|o| o.status),
            queue_position: None,
            progress_percentage: 0.0,
            statistics: batch.statistics.clone(),
            reason: batch.failure_reason.clone(),
        };

        if let Some(orchestration) = orchestration {
            report.progress_percentage = match orchestration.status {
                OrchestrationStatus::Completed => 100.0,
                _ => {
                    let entries = self.store.list_progress(orchestration.orchestration_id).await?;
                    overall_percentage(&entries, orchestration.phase_count)
                }
            };
            if report.reason.is_none() {
                report.reason = orchestration.rollback_reason.clone().or_else(|| {
                    orchestration
                        .error_details
                        .as_ref()
                        .and_then(|d| d.get("reason"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                });
            }
            if let Some(request_id) = orchestration.request_id {
                report.queue_position = self
                    .queue
                    .get(request_id)
                    .await?
                    .and_then(|entry| entry.queue_position);
            }
        }
        Ok(report)
    }

    /// Operator rollback of a finished import
    #[instrument(skip(self, reason))]
    pub async fn rollback(&self, batch_id: Uuid, reason: &str, actor: &str) -> Result<RollbackReport> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or(ImportError::NotFound {
                entity: "batch",
                id: batch_id,
            })?;
        let orchestration_id = batch.orchestration_id.ok_or_else(|| {
            ImportError::validation(format!("batch {batch_id} has no orchestration to roll back"))
        })?;
        let orchestration = self
            .store
            .get_orchestration(orchestration_id)
            .await?
            .ok_or(ImportError::NotFound {
                entity: "orchestration",
                id: orchestration_id,
            })?;

        if !orchestration.status.is_terminal() {
            return Err(ImportError::validation(format!(
                "orchestration {orchestration_id} is {}; cancel it instead",
                orchestration.status
            )));
        }
        self.rollback.rollback(orchestration_id, reason, actor).await
    }

    /// Cancel a request. A still-queued request is closed right away; a
    /// running one stops at its next phase boundary.
    #[instrument(skip(self))]
    pub async fn cancel(&self, request_id: Uuid) -> Result<CancelOutcome> {
        let outcome = self.queue.cancel(request_id).await?;
        if outcome != CancelOutcome::Cancelled {
            return Ok(outcome);
        }

        let Some(entry) = self.queue.get(request_id).await? else {
            return Ok(outcome);
        };
        if let Some(orchestration_id) = entry.orchestration_id {
            self.close_cancelled(orchestration_id).await?;
        }
        if let Some(execution_id) = entry.execution_id {
            self.scheduler
                .handle_completion(
                    execution_id,
                    ExecutionStatus::Cancelled,
                    0,
                    Some(CANCELLED_REASON),
                    Utc::now(),
                )
                .await?;
        }
        Ok(outcome)
    }

    async fn close_cancelled(&self, orchestration_id: Uuid) -> Result<()> {
        let Some(mut orchestration) = self.store.get_orchestration(orchestration_id).await? else {
            return Ok(());
        };
        if orchestration.status != OrchestrationStatus::Pending {
            warn!(orchestration_id = %orchestration_id, status = %orchestration.status, "Cancelled request had a started orchestration");
            return Ok(());
        }

        self.state_machine
            .transition(
                &mut orchestration,
                OrchestrationEvent::Fail(CANCELLED_REASON.to_string()),
            )
            .await?;
        orchestration.error_details = Some(json!({
            "reason": CANCELLED_REASON,
            "kind": FailureKind::Cancelled,
        }));
        self.store.update_orchestration(&orchestration).await?;

        for batch in self.store.batches_for_orchestration(orchestration_id).await? {
            self.store
                .finalize_batch(
                    batch.batch_id,
                    BatchStatus::Failed,
                    &batch.statistics,
                    Some(CANCELLED_REASON),
                    Utc::now(),
                )
                .await?;
        }
        info!(orchestration_id = %orchestration_id, "Queued import cancelled");
        Ok(())
    }

    /// A worker bound to this service's components
    pub fn worker(&self, worker_id: impl Into<String>) -> ImportWorker {
        ImportWorker::new(
            worker_id,
            self.queue.clone(),
            self.locks.clone(),
            self.orchestrator.clone(),
            Some(self.scheduler.clone()),
        )
    }

    pub fn start_workers(&self, count: usize) -> WorkerPool {
        WorkerPool::start(self.worker("import-worker"), count, &self.config.locks)
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn orchestrator(&self) -> &ImportOrchestrator {
        &self.orchestrator
    }

    pub fn rollback_engine(&self) -> &RollbackEngine {
        &self.rollback
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}
