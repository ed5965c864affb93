use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::state_machine::OrchestrationStatus;

/// The fixed, ordered phases of an import orchestration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Validate,
    AcquireLocks,
    Stage,
    Promote,
    Finalize,
}

impl ImportPhase {
    pub const ALL: [ImportPhase; 5] = [
        Self::Validate,
        Self::AcquireLocks,
        Self::Stage,
        Self::Promote,
        Self::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::AcquireLocks => "acquire_locks",
            Self::Stage => "stage",
            Self::Promote => "promote",
            Self::Finalize => "finalize",
        }
    }

    /// 1-based position in the phase sequence
    pub fn ordinal(&self) -> usize {
        Self::ALL
            .iter()
            .position(|phase| phase == self)
            .map(|index| index + 1)
            .unwrap_or(0)
    }

    /// Phases that are skipped on resume once they reported 100%.
    /// Lock acquisition always re-runs because locks may have expired.
    pub fn is_resumable(&self) -> bool {
        !matches!(self, Self::AcquireLocks | Self::Finalize)
    }
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ImportPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| format!("Invalid import phase: {s}"))
    }
}

/// Structured per-phase bookkeeping stored on the orchestration row
///
/// This is what makes a run resumable: a worker picking up an abandoned
/// request reads it to learn which phases committed and which entity types
/// already reached the master tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseDetails {
    /// Batch whose rows are staged and promoted by this run
    pub batch_id: Option<Uuid>,
    pub current_phase: Option<ImportPhase>,
    pub completed_phases: Vec<ImportPhase>,
    /// Entity types of this import in dependency order
    pub entity_order: Vec<String>,
    pub lock_keys: Vec<String>,
    /// Staged row counts per entity type
    pub staged: BTreeMap<String, i64>,
    /// Entity types whose promotion was started, in order
    pub promote_attempted: Vec<String>,
    /// Entity types whose promotion committed, in order
    pub promoted: Vec<String>,
    pub promoted_counts: BTreeMap<String, i64>,
}

impl PhaseDetails {
    pub fn is_completed(&self, phase: ImportPhase) -> bool {
        self.completed_phases.contains(&phase)
    }

    /// Record a completed phase; returns false when it was already recorded
    pub fn mark_completed(&mut self, phase: ImportPhase) -> bool {
        if self.is_completed(phase) {
            return false;
        }
        self.completed_phases.push(phase);
        true
    }

    pub fn is_promoted(&self, entity_type: &str) -> bool {
        self.promoted.iter().any(|e| e == entity_type)
    }

    pub fn record_promote_attempt(&mut self, entity_type: &str) {
        if !self.promote_attempted.iter().any(|e| e == entity_type) {
            self.promote_attempted.push(entity_type.to_string());
        }
    }

    pub fn record_promoted(&mut self, entity_type: &str, rows: i64) {
        if !self.is_promoted(entity_type) {
            self.promoted.push(entity_type.to_string());
        }
        self.promoted_counts.insert(entity_type.to_string(), rows);
    }

    /// Whether any promotion may have reached the master tables
    pub fn has_partial_promotion(&self) -> bool {
        !self.promote_attempted.is_empty()
    }
}

/// Orchestration is one multi-phase run coordinating one or more batches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orchestration {
    pub orchestration_id: Uuid,
    /// Queue request driving this run (owner of its resource locks)
    pub request_id: Option<Uuid>,
    pub status: OrchestrationStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub phase_count: i32,
    pub success_count: i32,
    pub error_count: i32,
    pub phase_details: PhaseDetails,
    pub configuration: Value,
    pub statistics: Value,
    pub error_details: Option<Value>,
    pub rollback_reason: Option<String>,
}

impl Orchestration {
    pub fn new(phase_count: i32, configuration: Value) -> Self {
        Self {
            orchestration_id: Uuid::new_v4(),
            request_id: None,
            status: OrchestrationStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            phase_count,
            success_count: 0,
            error_count: 0,
            phase_details: PhaseDetails::default(),
            configuration,
            statistics: serde_json::json!({}),
            error_details: None,
            rollback_reason: None,
        }
    }

    /// `error_count + success_count <= phase_count`
    pub fn counters_consistent(&self) -> bool {
        self.error_count + self.success_count <= self.phase_count
    }

    /// Count a finished phase once, keeping the counter invariant
    pub fn record_phase_success(&mut self, phase: ImportPhase) {
        if self.phase_details.mark_completed(phase) && self.counters_consistent_after(1) {
            self.success_count += 1;
        }
    }

    pub fn record_phase_error(&mut self) {
        if self.counters_consistent_after(1) {
            self.error_count += 1;
        }
    }

    fn counters_consistent_after(&self, increment: i32) -> bool {
        self.error_count + self.success_count + increment <= self.phase_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_and_names() {
        let names: Vec<_> = ImportPhase::ALL.iter().map(|p| p.as_str()).collect();
        assert_eq!(
            names,
            vec!["validate", "acquire_locks", "stage", "promote", "finalize"]
        );
        assert_eq!(ImportPhase::Validate.ordinal(), 1);
        assert_eq!(ImportPhase::Finalize.ordinal(), 5);
        assert_eq!("promote".parse::<ImportPhase>().unwrap(), ImportPhase::Promote);
    }

    #[test]
    fn test_success_counted_once_per_phase() {
        let mut orchestration = Orchestration::new(5, serde_json::json!({}));
        orchestration.record_phase_success(ImportPhase::Validate);
        orchestration.record_phase_success(ImportPhase::Validate);
        assert_eq!(orchestration.success_count, 1);
        assert!(orchestration.counters_consistent());
    }

    #[test]
    fn test_counters_never_exceed_phase_count() {
        let mut orchestration = Orchestration::new(5, serde_json::json!({}));
        for phase in ImportPhase::ALL {
            orchestration.record_phase_success(phase);
        }
        orchestration.record_phase_error();
        assert_eq!(orchestration.success_count, 5);
        assert_eq!(orchestration.error_count, 0);
        assert!(orchestration.counters_consistent());
    }

    #[test]
    fn test_promotion_tracking() {
        let mut details = PhaseDetails::default();
        assert!(!details.has_partial_promotion());
        details.record_promote_attempt("Teams");
        details.record_promote_attempt("Teams");
        details.record_promoted("Teams", 3);
        assert_eq!(details.promote_attempted, vec!["Teams".to_string()]);
        assert!(details.is_promoted("Teams"));
        assert!(details.has_partial_promotion());
    }
}
