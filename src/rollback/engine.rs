use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::collaborators::StagingArea;
use crate::dependency::DependencyResolver;
use crate::error::{ImportError, Result};
use crate::events::{EventPublisher, ImportEvent};
use crate::locks::LockManager;
use crate::logging::log_rollback_operation;
use crate::models::{ImportPhase, Orchestration, RollbackAction, RollbackActionType};
use crate::state_machine::{
    determine_target_state, BatchStatus, OrchestrationEvent, OrchestrationStateMachine,
    OrchestrationStatus,
};
use crate::store::{OrchestrationStore, RollbackStore};

/// Aggregate result of one rollback request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub orchestration_id: Uuid,
    pub actions: Vec<RollbackAction>,
    /// At least one compensating action failed
    pub partial_failure: bool,
    /// The orchestration was already `ROLLED_BACK`; `actions` are the
    /// previously recorded ones
    pub already_rolled_back: bool,
}

#[derive(Clone)]
pub struct RollbackEngine {
    orchestrations: Arc<dyn OrchestrationStore>,
    actions: Arc<dyn RollbackStore>,
    state_machine: OrchestrationStateMachine,
    locks: LockManager,
    staging: Arc<dyn StagingArea>,
    resolver: Arc<DependencyResolver>,
    events: EventPublisher,
}

impl std::fmt::Debug for RollbackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackEngine").finish_non_exhaustive()
    }
}

impl RollbackEngine {
    pub fn new(
        orchestrations: Arc<dyn OrchestrationStore>,
        actions: Arc<dyn RollbackStore>,
        locks: LockManager,
        staging: Arc<dyn StagingArea>,
        resolver: Arc<DependencyResolver>,
        events: EventPublisher,
    ) -> Self {
        Self {
            state_machine: OrchestrationStateMachine::new(orchestrations.clone()),
            orchestrations,
            actions,
            locks,
            staging,
            resolver,
            events,
        }
    }

    /// Compensate everything the orchestration promoted and move it to
    /// `ROLLED_BACK`.
    ///
    /// Allowed from `IN_PROGRESS` and `FAILED`, and from `COMPLETED` as an
    /// operator rollback. A second call on a rolled-back orchestration
    /// returns the recorded actions without compensating again.
    #[instrument(skip(self, reason), fields(actor = %actor))]
    pub async fn rollback(
        &self,
        orchestration_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<RollbackReport> {
        let mut orchestration = self
            .orchestrations
            .get_orchestration(orchestration_id)
            .await?
            .ok_or(ImportError::NotFound {
                entity: "orchestration",
                id: orchestration_id,
            })?;

        if orchestration.status == OrchestrationStatus::RolledBack {
            let actions = self.actions.actions_for(orchestration_id).await?;
            info!(
                orchestration_id = %orchestration_id,
                actions = actions.len(),
                "Orchestration already rolled back"
            );
            return Ok(RollbackReport {
                orchestration_id,
                partial_failure: actions.iter().any(|a| !a.success),
                actions,
                already_rolled_back: true,
            });
        }

        let event = match orchestration.status {
            OrchestrationStatus::Completed => OrchestrationEvent::OperatorRollback(reason.to_string()),
            _ => OrchestrationEvent::Rollback(reason.to_string()),
        };
        determine_target_state(orchestration.status, &event)?;

        let actions = self.compensate_all(&orchestration, reason, actor).await?;
        let partial_failure = actions.iter().any(|a| !a.success);

        if let Some(owner) = orchestration.request_id {
            self.locks.release_all(owner).await?;
        }

        self.state_machine.transition(&mut orchestration, event).await?;

        for batch in self
            .orchestrations
            .batches_for_orchestration(orchestration_id)
            .await?
        {
            let finalized = self
                .orchestrations
                .finalize_batch(
                    batch.batch_id,
                    BatchStatus::RolledBack,
                    &batch.statistics,
                    Some(reason),
                    Utc::now(),
                )
                .await?;
            if !finalized {
                warn!(batch_id = %batch.batch_id, status = %batch.status.as_str(), "Batch not moved to ROLLED_BACK");
            }
        }

        if partial_failure {
            error!(orchestration_id = %orchestration_id, "Rollback finished with failed actions");
        } else {
            info!(orchestration_id = %orchestration_id, actions = actions.len(), "Rollback finished");
        }
        self.events.publish(ImportEvent::RollbackFinished {
            orchestration_id,
            partial_failure,
        });
        self.events.publish(ImportEvent::OrchestrationFinished {
            orchestration_id,
            status: OrchestrationStatus::RolledBack,
        });

        Ok(RollbackReport {
            orchestration_id,
            actions,
            partial_failure,
            already_rolled_back: false,
        })
    }

    /// One action per entity type, newest dependency first. Failures are
    /// recorded and do not stop the remaining entity types.
    async fn compensate_all(
        &self,
        orchestration: &Orchestration,
        reason: &str,
        actor: &str,
    ) -> Result<Vec<RollbackAction>> {
        let details = &orchestration.phase_details;
        let batch_id = details.batch_id.unwrap_or(orchestration.orchestration_id);
        let stopped_at = details
            .current_phase
            .unwrap_or(ImportPhase::Validate)
            .as_str();

        let mut actions = Vec::with_capacity(details.entity_order.len());
        for entity_type in details.entity_order.iter().rev() {
            let attempted = details.promote_attempted.iter().any(|e| e == entity_type)
                || details.is_promoted(entity_type);

            let mut action = RollbackAction {
                action_id: Uuid::new_v4(),
                orchestration_id: orchestration.orchestration_id,
                batch_id: details.batch_id,
                action_type: RollbackActionType::NoOp,
                entity_type: entity_type.clone(),
                target_phase: stopped_at.to_string(),
                reason: reason.to_string(),
                rollback_details: json!({ "promoted": false }),
                executed_by: actor.to_string(),
                executed_at: Utc::now(),
                success: true,
                error_message: None,
                recovery_data: None,
            };

            if attempted {
                let rollback_query = self.resolver.rollback_query(entity_type);
                action.target_phase = ImportPhase::Promote.as_str().to_string();
                match self
                    .staging
                    .compensate(batch_id, entity_type, rollback_query)
                    .await
                {
                    Ok(outcome) => {
                        if outcome.rows_removed > 0 {
                            action.action_type = RollbackActionType::CompensatingDelete;
                        }
                        action.rollback_details = json!({
                            "promoted": true,
                            "rows_removed": outcome.rows_removed,
                            "rollback_query": rollback_query,
                        });
                        action.recovery_data = outcome.recovery_data;
                    }
                    Err(e) => {
                        action.action_type = RollbackActionType::CompensatingDelete;
                        action.success = false;
                        action.error_message = Some(e.to_string());
                        action.rollback_details = json!({
                            "promoted": true,
                            "rollback_query": rollback_query,
                        });
                    }
                }
            }
            action.executed_at = Utc::now();

            self.actions.append_action(&action).await?;
            log_rollback_operation(
                action.orchestration_id,
                &action.entity_type,
                action.action_type.as_str(),
                action.success,
                action.error_message.as_deref(),
            );
            self.events.publish(ImportEvent::RollbackActionRecorded {
                orchestration_id: action.orchestration_id,
                entity_type: action.entity_type.clone(),
                action_type: action.action_type,
                success: action.success,
            });
            actions.push(action);
        }
        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryStagingArea, Row};
    use crate::config::LockConfig;
    use crate::models::{EntityDependency, ImportBatch, NewImportBatch};
    use crate::store::MemoryStore;
    use serde_json::Value;

    struct Fixture {
        store: Arc<MemoryStore>,
        staging: Arc<InMemoryStagingArea>,
        engine: RollbackEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let staging = Arc::new(InMemoryStagingArea::new());
        let resolver = DependencyResolver::new(vec![
            EntityDependency::root("Teams", 1),
            EntityDependency::depending_on("Applications", "Teams", 2),
        ])
        .unwrap();
        let events = EventPublisher::default();
        let locks = LockManager::new(store.clone(), LockConfig::default(), events.clone());
        let engine = RollbackEngine::new(
            store.clone(),
            store.clone(),
            locks,
            staging.clone(),
            Arc::new(resolver),
            events,
        );
        Fixture {
            store,
            staging,
            engine,
        }
    }

    fn row(name: &str) -> Row {
        let mut row = Row::new();
        row.insert("name".into(), Value::String(name.into()));
        row
    }

    async fn promoted_orchestration(fx: &Fixture, status: OrchestrationStatus) -> Orchestration {
        let mut orchestration = Orchestration::new(5, Value::Null);
        let batch = ImportBatch::new(NewImportBatch {
            source_descriptor: "test".into(),
            import_type: "Teams".into(),
            owner: "alice".into(),
            orchestration_id: Some(orchestration.orchestration_id),
        });
        fx.store.create_batch(&batch).await.unwrap();

        fx.staging
            .stage(batch.batch_id, "Teams", &[row("a"), row("b")])
            .await
            .unwrap();
        fx.staging.promote(batch.batch_id, "Teams").await.unwrap();

        orchestration.status = status;
        orchestration.phase_details.batch_id = Some(batch.batch_id);
        orchestration.phase_details.entity_order = vec!["Teams".into(), "Applications".into()];
        orchestration.phase_details.record_promote_attempt("Teams");
        orchestration.phase_details.record_promoted("Teams", 2);
        fx.store.create_orchestration(&orchestration).await.unwrap();
        orchestration
    }

    #[tokio::test]
    async fn test_reverse_order_actions() {
        let fx = fixture();
        let orchestration = promoted_orchestration(&fx, OrchestrationStatus::Failed).await;

        let report = fx
            .engine
            .rollback(orchestration.orchestration_id, "promote failed", "system")
            .await
            .unwrap();

        let order: Vec<_> = report.actions.iter().map(|a| a.entity_type.as_str()).collect();
        assert_eq!(order, vec!["Applications", "Teams"]);
        assert_eq!(report.actions[0].action_type, RollbackActionType::NoOp);
        assert_eq!(report.actions[1].action_type, RollbackActionType::CompensatingDelete);
        assert!(report.actions[1].recovery_data.is_some());
        assert!(!report.partial_failure);
        assert_eq!(fx.staging.master_count("Teams").await.unwrap(), 0);

        let stored = fx
            .store
            .get_orchestration(orchestration.orchestration_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrchestrationStatus::RolledBack);
    }

    #[tokio::test]
    async fn test_operator_rollback_is_idempotent() {
        let fx = fixture();
        let orchestration = promoted_orchestration(&fx, OrchestrationStatus::Completed).await;

        let first = fx
            .engine
            .rollback(orchestration.orchestration_id, "bad data", "operator")
            .await
            .unwrap();
        let second = fx
            .engine
            .rollback(orchestration.orchestration_id, "bad data", "operator")
            .await
            .unwrap();

        assert!(!first.already_rolled_back);
        assert!(second.already_rolled_back);
        assert_eq!(first.actions.len(), second.actions.len());
        assert_eq!(fx.staging.master_count("Teams").await.unwrap(), 0);
        let batches = fx
            .store
            .batches_for_orchestration(orchestration.orchestration_id)
            .await
            .unwrap();
        assert_eq!(batches[0].status, BatchStatus::RolledBack);
    }

    #[tokio::test]
    async fn test_failed_compensation_recorded_and_continues() {
        let fx = fixture();
        let orchestration = promoted_orchestration(&fx, OrchestrationStatus::Failed).await;
        fx.staging.fail_compensation_of("Teams");

        let report = fx
            .engine
            .rollback(orchestration.orchestration_id, "promote failed", "system")
            .await
            .unwrap();

        assert!(report.partial_failure);
        assert_eq!(report.actions.len(), 2);
        assert!(!report.actions[1].success);
        assert!(report.actions[1].error_message.is_some());
        let recorded = fx
            .store
            .actions_for(orchestration.orchestration_id)
            .await
            .unwrap();
        assert_eq!(recorded.len(), 2);
    }

    #[tokio::test]
    async fn test_pending_orchestration_cannot_roll_back() {
        let fx = fixture();
        let orchestration = Orchestration::new(5, Value::Null);
        fx.store.create_orchestration(&orchestration).await.unwrap();

        let result = fx
            .engine
            .rollback(orchestration.orchestration_id, "nope", "operator")
            .await;
        assert!(matches!(result, Err(ImportError::InvalidTransition(_))));
        assert!(fx
            .store
            .actions_for(orchestration.orchestration_id)
            .await
            .unwrap()
            .is_empty());
    }
}
