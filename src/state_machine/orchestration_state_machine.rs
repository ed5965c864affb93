use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use super::errors::{StateMachineError, StateMachineResult};
use super::events::OrchestrationEvent;
use super::states::OrchestrationStatus;
use crate::error::Result;
use crate::models::Orchestration;
use crate::store::OrchestrationStore;

/// Decide the status an event leads to, without touching storage
pub fn determine_target_state(
    current: OrchestrationStatus,
    event: &OrchestrationEvent,
) -> StateMachineResult<OrchestrationStatus> {
    use OrchestrationEvent as E;
    use OrchestrationStatus as S;

    let target = match (current, event) {
        (S::Pending, E::Start) => S::InProgress,
        (S::Pending, E::Fail(_)) => S::Failed,
        (S::InProgress, E::Complete) => S::Completed,
        (S::InProgress, E::Fail(_)) => S::Failed,
        (S::InProgress | S::Failed, E::Rollback(_)) => S::RolledBack,
        (S::InProgress | S::Failed | S::Completed, E::OperatorRollback(_)) => S::RolledBack,
        _ => {
            return Err(StateMachineError::InvalidTransition {
                from: current.to_string(),
                event: event.event_type().to_string(),
            })
        }
    };
    Ok(target)
}

/// Applies orchestration events and persists them with a compare-and-set on
/// the previous status
#[derive(Clone)]
pub struct OrchestrationStateMachine {
    store: Arc<dyn OrchestrationStore>,
}

impl std::fmt::Debug for OrchestrationStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationStateMachine").finish_non_exhaustive()
    }
}

impl OrchestrationStateMachine {
    pub fn new(store: Arc<dyn OrchestrationStore>) -> Self {
        Self { store }
    }

    /// Transition `orchestration` in place and persist it.
    ///
    /// On a lost race the in-memory record is left untouched and a
    /// `ConcurrentModification` error is returned.
    pub async fn transition(
        &self,
        orchestration: &mut Orchestration,
        event: OrchestrationEvent,
    ) -> Result<OrchestrationStatus> {
        let from = orchestration.status;
        let target = determine_target_state(from, &event)?;

        let mut next = orchestration.clone();
        apply(&mut next, target, &event);

        if !self.store.transition_orchestration(&next, from).await? {
            warn!(
                orchestration_id = %orchestration.orchestration_id,
                from = %from,
                to = %target,
                "Orchestration status changed concurrently"
            );
            return Err(StateMachineError::ConcurrentModification {
                entity: "orchestration",
                id: orchestration.orchestration_id.to_string(),
                expected: from.to_string(),
            }
            .into());
        }

        debug!(
            orchestration_id = %orchestration.orchestration_id,
            from = %from,
            to = %target,
            event = event.event_type(),
            "Orchestration transitioned"
        );
        *orchestration = next;
        Ok(target)
    }
}

fn apply(orchestration: &mut Orchestration, target: OrchestrationStatus, event: &OrchestrationEvent) {
    let now = Utc::now();
    orchestration.status = target;
    match event {
        OrchestrationEvent::Start => {
            orchestration.started_at.get_or_insert(now);
        }
        OrchestrationEvent::Complete => {
            orchestration.completed_at = Some(now);
        }
        OrchestrationEvent::Fail(reason) => {
            orchestration.completed_at = Some(now);
            orchestration.error_details = Some(json!({ "reason": reason }));
        }
        OrchestrationEvent::Rollback(reason) | OrchestrationEvent::OperatorRollback(reason) => {
            orchestration.completed_at = Some(now);
            orchestration.rollback_reason = Some(reason.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrchestrationEvent as E;
    use OrchestrationStatus as S;

    #[test]
    fn test_happy_path_transitions() {
        assert_eq!(determine_target_state(S::Pending, &E::Start).unwrap(), S::InProgress);
        assert_eq!(determine_target_state(S::InProgress, &E::Complete).unwrap(), S::Completed);
    }

    #[test]
    fn test_rolled_back_reachable_only_from_in_progress_or_failed() {
        let rollback = E::Rollback("torn write".into());
        assert_eq!(determine_target_state(S::InProgress, &rollback).unwrap(), S::RolledBack);
        assert_eq!(determine_target_state(S::Failed, &rollback).unwrap(), S::RolledBack);
        assert!(determine_target_state(S::Pending, &rollback).is_err());
        assert!(determine_target_state(S::Completed, &rollback).is_err());
        assert!(determine_target_state(S::RolledBack, &rollback).is_err());
    }

    #[test]
    fn test_operator_rollback_of_completed() {
        let event = E::OperatorRollback("bad source file".into());
        assert_eq!(determine_target_state(S::Completed, &event).unwrap(), S::RolledBack);
        assert!(determine_target_state(S::RolledBack, &event).is_err());
        assert!(determine_target_state(S::Pending, &event).is_err());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [S::Completed, S::Failed, S::RolledBack] {
            assert!(determine_target_state(terminal, &E::Start).is_err());
            assert!(determine_target_state(terminal, &E::Complete).is_err());
            assert!(determine_target_state(terminal, &E::Fail("x".into())).is_err());
        }
    }

    #[test]
    fn test_apply_records_reason() {
        let mut orchestration = Orchestration::new(5, json!({}));
        apply(&mut orchestration, S::Failed, &E::Fail("cancelled".into()));
        assert_eq!(orchestration.status, S::Failed);
        assert_eq!(orchestration.error_details, Some(json!({ "reason": "cancelled" })));
        assert!(orchestration.completed_at.is_some());
    }
}
