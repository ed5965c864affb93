use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::constants::IMPORT_ALL_TYPE;
use crate::error::{ImportError, Result};
use crate::models::{
    DependencyType, ImportBatch, NewImportBatch, NewQueueEntry, Orchestration,
    OrchestrationDependency, ResourceAmounts,
};
use crate::queue::QueueManager;
use crate::state_machine::{BatchStatus, OrchestrationEvent, OrchestrationStateMachine};
use crate::store::OrchestrationStore;

/// An orchestration that must finish before the submitted one starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prerequisite {
    pub orchestration_id: Uuid,
    pub dependency_type: DependencyType,
}

/// Caller request to import one payload set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportSubmission {
    pub import_type: String,
    pub source_descriptor: String,
    pub priority: i32,
    pub requester: String,
    pub tenant_id: String,
    /// Interpreted by the orchestrator, see [`ImportPlan`](super::ImportPlan)
    #[serde(default)]
    pub configuration: Value,
    #[serde(default)]
    pub resource_requirements: ResourceAmounts,
    pub estimated_duration_seconds: Option<i64>,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    pub schedule_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub batch_id: Uuid,
    pub orchestration_id: Uuid,
    pub request_id: Uuid,
    pub queue_position: i32,
}

/// Creates the orchestration, batch and queue entry for a submission
#[derive(Clone)]
pub struct ImportIntake {
    store: Arc<dyn OrchestrationStore>,
    state_machine: OrchestrationStateMachine,
    queue: QueueManager,
    phase_count: i32,
}

impl std::fmt::Debug for ImportIntake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportIntake")
            .field("phase_count", &self.phase_count)
            .finish_non_exhaustive()
    }
}

impl ImportIntake {
    pub fn new(store: Arc<dyn OrchestrationStore>, queue: QueueManager, phase_count: i32) -> Self {
        Self {
            state_machine: OrchestrationStateMachine::new(store.clone()),
            store,
            queue,
            phase_count,
        }
    }

    #[instrument(skip(self, submission), fields(import_type = %submission.import_type))]
    pub async fn submit(&self, submission: ImportSubmission) -> Result<SubmissionReceipt> {
        if submission.import_type == IMPORT_ALL_TYPE {
            return Err(ImportError::NotImplemented(
                "bulk \"Import All\" is not supported; submit one import per entity type".into(),
            ));
        }

        let mut request = NewQueueEntry {
            priority: submission.priority,
            import_type: submission.import_type.clone(),
            requester: submission.requester.clone(),
            tenant_id: submission.tenant_id.clone(),
            estimated_duration_seconds: submission.estimated_duration_seconds,
            resource_requirements: submission.resource_requirements.clone(),
            configuration: submission.configuration.clone(),
            orchestration_id: None,
            schedule_id: submission.schedule_id,
            execution_id: submission.execution_id,
        };
        QueueManager::validate_request(&request)?;

        for prerequisite in &submission.prerequisites {
            if self
                .store
                .get_orchestration(prerequisite.orchestration_id)
                .await?
                .is_none()
            {
                return Err(ImportError::validation(format!(
                    "prerequisite orchestration {} does not exist",
                    prerequisite.orchestration_id
                )));
            }
        }

        let mut orchestration = Orchestration::new(self.phase_count, submission.configuration.clone());
        self.store.create_orchestration(&orchestration).await?;

        let batch = ImportBatch::new(NewImportBatch {
            source_descriptor: submission.source_descriptor.clone(),
            import_type: submission.import_type.clone(),
            owner: submission.requester.clone(),
            orchestration_id: Some(orchestration.orchestration_id),
        });
        self.store.create_batch(&batch).await?;

        for prerequisite in &submission.prerequisites {
            self.store
                .add_dependency(&OrchestrationDependency::new(
                    orchestration.orchestration_id,
                    prerequisite.orchestration_id,
                    prerequisite.dependency_type,
                ))
                .await?;
        }

        request.orchestration_id = Some(orchestration.orchestration_id);
        let entry = match self.queue.enqueue(request).await {
            Ok(entry) => entry,
            Err(e) => {
                self.reject(&mut orchestration, &batch, &e).await;
                return Err(e);
            }
        };

        orchestration.request_id = Some(entry.request_id);
        self.store.update_orchestration(&orchestration).await?;

        let queue_position = entry.queue_position.unwrap_or_default();
        info!(
            batch_id = %batch.batch_id,
            orchestration_id = %orchestration.orchestration_id,
            request_id = %entry.request_id,
            queue_position = queue_position,
            "Import submitted"
        );
        Ok(SubmissionReceipt {
            batch_id: batch.batch_id,
            orchestration_id: orchestration.orchestration_id,
            request_id: entry.request_id,
            queue_position,
        })
    }

    /// Admission refused: close the records created for it
    async fn reject(&self, orchestration: &mut Orchestration, batch: &ImportBatch, error: &ImportError) {
        let reason = error.to_string();
        if let Err(e) = self
            .state_machine
            .transition(orchestration, OrchestrationEvent::Fail(reason.clone()))
            .await
        {
            warn!(orchestration_id = %orchestration.orchestration_id, error = %e, "Failed to close rejected orchestration");
        }
        if let Err(e) = self
            .store
            .finalize_batch(
                batch.batch_id,
                BatchStatus::Failed,
                &batch.statistics,
                Some(&reason),
                chrono::Utc::now(),
            )
            .await
        {
            warn!(batch_id = %batch.batch_id, error = %e, "Failed to close rejected batch");
        }
    }
}
