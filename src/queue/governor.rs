use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ImportError, Result};
use crate::models::{EnforcementLevel, ResourceAmounts, TenantResourceLimit};
use crate::store::TenantLimitStore;

/// Per-tenant resource ceilings consulted before admission
#[derive(Clone)]
pub struct TenantGovernor {
    store: Arc<dyn TenantLimitStore>,
}

impl std::fmt::Debug for TenantGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantGovernor").finish_non_exhaustive()
    }
}

impl TenantGovernor {
    pub fn new(store: Arc<dyn TenantLimitStore>) -> Self {
        Self { store }
    }

    pub async fn limits_for(&self, tenant_id: &str) -> Result<Vec<TenantResourceLimit>> {
        self.store.limits_for(tenant_id).await
    }

    /// Check `requested` against `limits` given the tenant's current usage.
    ///
    /// `usage` returns the amount already committed for a resource type.
    /// Only a `HARD` breach is an error; `SOFT` warns and `ADVISORY` logs.
    pub fn enforce<F>(
        tenant_id: &str,
        limits: &[TenantResourceLimit],
        requested: &ResourceAmounts,
        usage: F,
    ) -> Result<()>
    where
        F: Fn(&str) -> f64,
    {
        for limit in limits {
            let Some(&amount) = requested.get(&limit.resource_type) else {
                continue;
            };
            let in_use = usage(&limit.resource_type);
            if !limit.is_exceeded_by(in_use, amount) {
                continue;
            }

            match limit.enforcement {
                EnforcementLevel::Hard => {
                    warn!(
                        tenant_id = %tenant_id,
                        resource_type = %limit.resource_type,
                        requested = amount,
                        in_use = in_use,
                        limit = limit.limit_value,
                        "HARD tenant limit exceeded"
                    );
                    return Err(ImportError::ResourceLimitExceeded {
                        tenant_id: tenant_id.to_string(),
                        resource_type: limit.resource_type.clone(),
                        enforcement: limit.enforcement.to_string(),
                        requested: amount,
                        in_use,
                        limit: limit.limit_value,
                    });
                }
                EnforcementLevel::Soft => warn!(
                    tenant_id = %tenant_id,
                    resource_type = %limit.resource_type,
                    requested = amount,
                    in_use = in_use,
                    limit = limit.limit_value,
                    "SOFT tenant limit exceeded, admitting"
                ),
                EnforcementLevel::Advisory => info!(
                    tenant_id = %tenant_id,
                    resource_type = %limit.resource_type,
                    requested = amount,
                    in_use = in_use,
                    limit = limit.limit_value,
                    "ADVISORY tenant limit exceeded"
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requested(amount: f64) -> ResourceAmounts {
        ResourceAmounts::from([("db_connections".to_string(), amount)])
    }

    #[test]
    fn test_hard_limit_rejects() {
        let limits = vec![TenantResourceLimit::new(
            "acme",
            "db_connections",
            4.0,
            EnforcementLevel::Hard,
        )];
        assert!(TenantGovernor::enforce("acme", &limits, &requested(2.0), |_| 2.0).is_ok());
        let err = TenantGovernor::enforce("acme", &limits, &requested(2.0), |_| 3.0).unwrap_err();
        assert!(matches!(err, ImportError::ResourceLimitExceeded { .. }));
    }

    #[test]
    fn test_soft_and_advisory_admit() {
        let limits = vec![
            TenantResourceLimit::new("acme", "db_connections", 1.0, EnforcementLevel::Soft),
            TenantResourceLimit::new("acme", "db_connections", 1.0, EnforcementLevel::Advisory),
        ];
        assert!(TenantGovernor::enforce("acme", &limits, &requested(5.0), |_| 5.0).is_ok());
    }

    #[test]
    fn test_unrequested_resources_ignored() {
        let limits = vec![TenantResourceLimit::new("acme", "cpu", 0.0, EnforcementLevel::Hard)];
        assert!(TenantGovernor::enforce("acme", &limits, &requested(1.0), |_| 100.0).is_ok());
    }
}
