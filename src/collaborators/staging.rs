use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

use super::parser::Row;
use crate::error::{ImportError, Result};

/// Result of compensating one entity type of one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationOutcome {
    pub rows_removed: u64,
    /// Snapshot of the removed rows, enough to re-stage them later
    pub recovery_data: Option<Value>,
}

/// Staging and master storage for imported rows
#[async_trait]
pub trait StagingArea: Send + Sync {
    /// Write rows for one entity type of a batch, replacing anything staged
    /// before for the same pair. Returns the staged row count.
    async fn stage(&self, batch_id: Uuid, entity_type: &str, rows: &[Row]) -> Result<u64>;

    /// Move staged rows into the master table as one atomic unit
    async fn promote(&self, batch_id: Uuid, entity_type: &str) -> Result<u64>;

    /// Remove what `promote` wrote for this batch and entity type
    async fn compensate(
        &self,
        batch_id: Uuid,
        entity_type: &str,
        rollback_query: Option<&str>,
    ) -> Result<CompensationOutcome>;

    /// Whether the master table holds any row of this entity type
    async fn entity_present(&self, entity_type: &str) -> Result<bool>;

    async fn master_count(&self, entity_type: &str) -> Result<u64>;
}

#[derive(Debug, Default)]
struct StagingState {
    staged: HashMap<(Uuid, String), Vec<Row>>,
    /// entity type -> (owning batch, row)
    master: HashMap<String, Vec<(Option<Uuid>, Row)>>,
    failing_promotions: HashSet<String>,
    failing_compensations: HashSet<String>,
    promote_delay: Option<Duration>,
}

/// [`StagingArea`] held in memory, with failure injection hooks
#[derive(Debug, Default)]
pub struct InMemoryStagingArea {
    state: Mutex<StagingState>,
}

impl InMemoryStagingArea {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-existing master rows not owned by any batch
    pub fn seed_master(&self, entity_type: &str, rows: Vec<Row>) {
        let mut state = self.state.lock();
        let master = state.master.entry(entity_type.to_string()).or_default();
        master.extend(rows.into_iter().map(|row| (None, row)));
    }

    /// Make every promotion of `entity_type` fail before writing anything
    pub fn fail_promotion_of(&self, entity_type: &str) {
        self.state
            .lock()
            .failing_promotions
            .insert(entity_type.to_string());
    }

    pub fn fail_compensation_of(&self, entity_type: &str) {
        self.state
            .lock()
            .failing_compensations
            .insert(entity_type.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_promotions.clear();
        state.failing_compensations.clear();
    }

    /// Slow every promotion down, e.g. to exercise phase timeouts
    pub fn set_promote_delay(&self, delay: Option<Duration>) {
        self.state.lock().promote_delay = delay;
    }

    pub fn staged_count(&self, batch_id: Uuid, entity_type: &str) -> u64 {
        self.state
            .lock()
            .staged
            .get(&(batch_id, entity_type.to_string()))
            .map_or(0, |rows| rows.len() as u64)
    }
}

#[async_trait]
impl StagingArea for InMemoryStagingArea {
    async fn stage(&self, batch_id: Uuid, entity_type: &str, rows: &[Row]) -> Result<u64> {
        let mut state = self.state.lock();
        state
            .staged
            .insert((batch_id, entity_type.to_string()), rows.to_vec());
        Ok(rows.len() as u64)
    }

    async fn promote(&self, batch_id: Uuid, entity_type: &str) -> Result<u64> {
        let delay = self.state.lock().promote_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.failing_promotions.contains(entity_type) {
            return Err(ImportError::fatal(format!(
                "promotion of {entity_type} for batch {batch_id} aborted"
            )));
        }

        let rows = state
            .staged
            .get(&(batch_id, entity_type.to_string()))
            .cloned()
            .unwrap_or_default();
        let master = state.master.entry(entity_type.to_string()).or_default();
        // Re-promoting the same batch replaces its earlier rows
        master.retain(|(owner, _)| *owner != Some(batch_id));
        master.extend(rows.iter().cloned().map(|row| (Some(batch_id), row)));
        Ok(rows.len() as u64)
    }

    async fn compensate(
        &self,
        batch_id: Uuid,
        entity_type: &str,
        rollback_query: Option<&str>,
    ) -> Result<CompensationOutcome> {
        let mut state = self.state.lock();
        if state.failing_compensations.contains(entity_type) {
            return Err(ImportError::fatal(format!(
                "compensation of {entity_type} for batch {batch_id} failed"
            )));
        }

        let Some(master) = state.master.get_mut(entity_type) else {
            return Ok(CompensationOutcome {
                rows_removed: 0,
                recovery_data: None,
            });
        };

        let (removed, kept): (Vec<_>, Vec<_>) = master
            .drain(..)
            .partition(|(owner, _)| *owner == Some(batch_id));
        *master = kept;

        let removed_rows: Vec<Row> = removed.into_iter().map(|(_, row)| row).collect();
        let recovery_data = (!removed_rows.is_empty()).then(|| {
            json!({
                "batch_id": batch_id,
                "entity_type": entity_type,
                "rollback_query": rollback_query,
                "rows": removed_rows,
            })
        });

        Ok(CompensationOutcome {
            rows_removed: removed_rows.len() as u64,
            recovery_data,
        })
    }

    async fn entity_present(&self, entity_type: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .master
            .get(entity_type)
            .is_some_and(|rows| !rows.is_empty()))
    }

    async fn master_count(&self, entity_type: &str) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .master
            .get(entity_type)
            .map_or(0, |rows| rows.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str) -> Row {
        let mut row = Row::new();
        row.insert("name".into(), Value::String(name.into()));
        row
    }

    #[tokio::test]
    async fn test_stage_promote_compensate() {
        let staging = InMemoryStagingArea::new();
        let batch = Uuid::new_v4();
        staging.seed_master("Teams", vec![row("legacy")]);

        assert_eq!(staging.stage(batch, "Teams", &[row("a"), row("b")]).await.unwrap(), 2);
        assert_eq!(staging.promote(batch, "Teams").await.unwrap(), 2);
        assert_eq!(staging.promote(batch, "Teams").await.unwrap(), 2);
        assert_eq!(staging.master_count("Teams").await.unwrap(), 3);

        let outcome = staging.compensate(batch, "Teams", None).await.unwrap();
        assert_eq!(outcome.rows_removed, 2);
        assert!(outcome.recovery_data.is_some());
        assert_eq!(staging.master_count("Teams").await.unwrap(), 1);

        let again = staging.compensate(batch, "Teams", None).await.unwrap();
        assert_eq!(again.rows_removed, 0);
        assert!(again.recovery_data.is_none());
    }

    #[tokio::test]
    async fn test_failed_promotion_writes_nothing() {
        let staging = InMemoryStagingArea::new();
        let batch = Uuid::new_v4();
        staging.stage(batch, "Applications", &[row("api")]).await.unwrap();
        staging.fail_promotion_of("Applications");

        assert!(staging.promote(batch, "Applications").await.is_err());
        assert!(!staging.entity_present("Applications").await.unwrap());
    }
}
