use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::state_machine::BatchStatus;

/// ImportBatch is one logical import attempt with a single terminal status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub batch_id: Uuid,
    pub source_descriptor: String,
    pub import_type: String,
    pub status: BatchStatus,
    pub owner: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub statistics: Value,
    pub orchestration_id: Option<Uuid>,
    pub failure_reason: Option<String>,
}

/// New ImportBatch for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewImportBatch {
    pub source_descriptor: String,
    pub import_type: String,
    pub owner: String,
    pub orchestration_id: Option<Uuid>,
}

impl ImportBatch {
    pub fn new(new_batch: NewImportBatch) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            source_descriptor: new_batch.source_descriptor,
            import_type: new_batch.import_type,
            status: BatchStatus::InProgress,
            owner: new_batch.owner,
            started_at: Utc::now(),
            ended_at: None,
            statistics: serde_json::json!({}),
            orchestration_id: new_batch.orchestration_id,
            failure_reason: None,
        }
    }
}

/// Counters reported on a batch when it reaches a terminal status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStatistics {
    pub imported: i64,
    pub errors: i64,
    #[serde(default)]
    pub staged: i64,
    /// Promoted rows per entity type
    #[serde(default)]
    pub per_entity: BTreeMap<String, i64>,
}

impl ImportStatistics {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }

    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}
