use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

crate::status_enum! {
    pub enum ProgressStatus {
        Started => "STARTED",
        Running => "RUNNING",
        Completed => "COMPLETED",
        Failed => "FAILED",
        Skipped => "SKIPPED",
    }
}

/// One phase/step progress record of an orchestration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressTrackingEntry {
    pub progress_id: Uuid,
    pub orchestration_id: Uuid,
    pub phase: String,
    pub step: String,
    /// 0.0 - 100.0
    pub percentage: f64,
    pub items_processed: i64,
    pub items_total: i64,
    pub status: ProgressStatus,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProgressTrackingEntry {
    pub fn start(
        orchestration_id: Uuid,
        phase: impl Into<String>,
        step: impl Into<String>,
        items_total: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            progress_id: Uuid::new_v4(),
            orchestration_id,
            phase: phase.into(),
            step: step.into(),
            percentage: 0.0,
            items_processed: 0,
            items_total,
            status: ProgressStatus::Started,
            message: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Update processed items and derive the clamped percentage
    pub fn advance(&mut self, items_processed: i64) {
        self.items_processed = items_processed;
        self.percentage = if self.items_total > 0 {
            ((items_processed as f64 / self.items_total as f64) * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.status = ProgressStatus::Running;
        self.updated_at = Utc::now();
    }

    /// 100% is the commit signal for the phase
    pub fn complete(&mut self, message: Option<String>) {
        let now = Utc::now();
        self.items_processed = self.items_total.max(self.items_processed);
        self.percentage = 100.0;
        self.status = ProgressStatus::Completed;
        self.message = message;
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = ProgressStatus::Failed;
        self.message = Some(message.into());
        self.updated_at = Utc::now();
    }

    pub fn is_committed(&self) -> bool {
        self.status == ProgressStatus::Completed && self.percentage >= 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_tracks_items() {
        let mut entry = ProgressTrackingEntry::start(Uuid::new_v4(), "stage", "Teams", 4);
        entry.advance(1);
        assert_eq!(entry.percentage, 25.0);
        entry.advance(10);
        assert_eq!(entry.percentage, 100.0);
        assert!(!entry.is_committed());
        entry.complete(None);
        assert!(entry.is_committed());
    }

    #[test]
    fn test_zero_total_stays_at_zero_until_complete() {
        let mut entry = ProgressTrackingEntry::start(Uuid::new_v4(), "finalize", "phase", 0);
        entry.advance(0);
        assert_eq!(entry.percentage, 0.0);
        entry.complete(Some("done".into()));
        assert_eq!(entry.percentage, 100.0);
    }
}
