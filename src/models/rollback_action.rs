use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

crate::status_enum! {
    pub enum RollbackActionType {
        /// Rows promoted by the batch were removed from the master tables
        CompensatingDelete => "COMPENSATING_DELETE",
        /// Nothing of this entity type was committed
        NoOp => "NO_OP",
    }
}

/// One compensating step. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackAction {
    pub action_id: Uuid,
    pub orchestration_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub action_type: RollbackActionType,
    pub entity_type: String,
    pub target_phase: String,
    pub reason: String,
    pub rollback_details: Value,
    pub executed_by: String,
    pub executed_at: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
    /// Snapshot sufficient to re-stage the removed rows later
    pub recovery_data: Option<Value>,
}
