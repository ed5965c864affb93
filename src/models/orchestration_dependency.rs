use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

crate::status_enum! {
    pub enum DependencyType {
        Sequential => "SEQUENTIAL",
        Resource => "RESOURCE",
        Data => "DATA",
    }
}

/// Directed edge: `orchestration_id` waits for `depends_on_orchestration_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationDependency {
    pub dependency_id: Uuid,
    pub orchestration_id: Uuid,
    pub depends_on_orchestration_id: Uuid,
    pub dependency_type: DependencyType,
    pub created_at: DateTime<Utc>,
}

impl OrchestrationDependency {
    pub fn new(
        orchestration_id: Uuid,
        depends_on_orchestration_id: Uuid,
        dependency_type: DependencyType,
    ) -> Self {
        Self {
            dependency_id: Uuid::new_v4(),
            orchestration_id,
            depends_on_orchestration_id,
            dependency_type,
            created_at: Utc::now(),
        }
    }
}
