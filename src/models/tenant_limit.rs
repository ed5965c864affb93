use serde::{Deserialize, Serialize};

crate::status_enum! {
    pub enum EnforcementLevel {
        /// Reject admission
        Hard => "HARD",
        /// Admit and warn
        Soft => "SOFT",
        /// Admit and log
        Advisory => "ADVISORY",
    }
}

/// Per-tenant ceiling on one resource type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantResourceLimit {
    pub tenant_id: String,
    pub resource_type: String,
    pub unit: String,
    pub limit_value: f64,
    pub enforcement: EnforcementLevel,
}

impl TenantResourceLimit {
    pub fn new(
        tenant_id: impl Into<String>,
        resource_type: impl Into<String>,
        limit_value: f64,
        enforcement: EnforcementLevel,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            resource_type: resource_type.into(),
            unit: "count".to_string(),
            limit_value,
            enforcement,
        }
    }

    pub fn is_exceeded_by(&self, in_use: f64, requested: f64) -> bool {
        in_use + requested > self.limit_value
    }
}
