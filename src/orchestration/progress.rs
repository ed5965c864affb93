use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::events::{EventPublisher, ImportEvent};
use crate::logging::log_phase_operation;
use crate::models::{ImportPhase, ProgressTrackingEntry};
use crate::store::OrchestrationStore;

/// Step name of the entry that tracks a phase as a whole
pub const PHASE_STEP: &str = "phase";

/// Writes progress entries and mirrors them as events
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<dyn OrchestrationStore>,
    events: EventPublisher,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn OrchestrationStore>, events: EventPublisher) -> Self {
        Self { store, events }
    }

    pub async fn start(
        &self,
        orchestration_id: Uuid,
        phase: ImportPhase,
        step: &str,
        items_total: i64,
    ) -> Result<ProgressTrackingEntry> {
        let entry = ProgressTrackingEntry::start(orchestration_id, phase.as_str(), step, items_total);
        self.persist(&entry).await?;
        Ok(entry)
    }

    pub async fn advance(&self, entry: &mut ProgressTrackingEntry, items_processed: i64) -> Result<()> {
        entry.advance(items_processed);
        self.persist(entry).await
    }

    pub async fn complete(&self, entry: &mut ProgressTrackingEntry, message: Option<String>) -> Result<()> {
        entry.complete(message);
        self.persist(entry).await
    }

    pub async fn fail(&self, entry: &mut ProgressTrackingEntry, message: &str) -> Result<()> {
        entry.fail(message);
        self.persist(entry).await
    }

    async fn persist(&self, entry: &ProgressTrackingEntry) -> Result<()> {
        self.store.upsert_progress(entry).await?;
        if entry.step == PHASE_STEP {
            log_phase_operation(
                entry.orchestration_id,
                &entry.phase,
                entry.status.as_str(),
                entry.percentage,
                entry.message.as_deref(),
            );
        }
        self.events.publish(ImportEvent::PhaseProgress {
            orchestration_id: entry.orchestration_id,
            phase: entry.phase.clone(),
            step: entry.step.clone(),
            percentage: entry.percentage,
        });
        Ok(())
    }
}

/// Overall completion: phase-level percentages summed over the configured
/// phase count
pub fn overall_percentage(entries: &[ProgressTrackingEntry], phase_count: i32) -> f64 {
    if phase_count <= 0 {
        return 0.0;
    }
    let total: f64 = entries
        .iter()
        .filter(|entry| entry.step == PHASE_STEP)
        .map(|entry| entry.percentage)
        .sum();
    (total / phase_count as f64).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_percentage_ignores_entity_steps() {
        let orchestration_id = Uuid::new_v4();
        let mut validate = ProgressTrackingEntry::start(orchestration_id, "validate", PHASE_STEP, 1);
        validate.complete(None);
        let mut stage = ProgressTrackingEntry::start(orchestration_id, "stage", PHASE_STEP, 2);
        stage.advance(1);
        let mut teams = ProgressTrackingEntry::start(orchestration_id, "stage", "Teams", 2);
        teams.complete(None);

        let overall = overall_percentage(&[validate, stage, teams], 5);
        assert_eq!(overall, 30.0);
        assert_eq!(overall_percentage(&[], 0), 0.0);
    }
}
