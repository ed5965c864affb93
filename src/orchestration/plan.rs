use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::collaborators::RawInput;
use crate::constants::IMPORT_ALL_TYPE;
use crate::error::{ImportError, Result};

/// What one orchestration imports, read from the request configuration.
///
/// ```json
/// {
///   "entity_types": ["Teams", "Applications"],
///   "payloads": { "Teams": { "format": "csv", "content": "name\nCore\n" } },
///   "phase_timeout_seconds": 600
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportPlan {
    /// Defaults to the request's import type
    pub entity_types: Vec<String>,
    pub payloads: BTreeMap<String, RawInput>,
    pub phase_timeout_seconds: Option<u64>,
}

impl ImportPlan {
    pub fn from_configuration(import_type: &str, configuration: &Value) -> Result<Self> {
        if import_type == IMPORT_ALL_TYPE {
            return Err(ImportError::NotImplemented(
                "bulk \"Import All\" is not supported; submit one import per entity type".into(),
            ));
        }

        let mut plan: ImportPlan = match configuration {
            Value::Null => ImportPlan::default(),
            Value::Object(_) => serde_json::from_value(configuration.clone())
                .map_err(|e| ImportError::validation(format!("invalid import configuration: {e}")))?,
            other => {
                return Err(ImportError::validation(format!(
                    "import configuration must be an object, got {other}"
                )))
            }
        };

        if plan.entity_types.is_empty() {
            plan.entity_types.push(import_type.to_string());
        }
        if plan.phase_timeout_seconds == Some(0) {
            return Err(ImportError::validation("phase_timeout_seconds must be positive"));
        }
        Ok(plan)
    }

    pub fn phase_timeout(&self, default: Duration) -> Duration {
        self.phase_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    pub fn payload(&self, entity_type: &str) -> Result<&RawInput> {
        self.payloads.get(entity_type).ok_or_else(|| {
            ImportError::validation(format!("no payload supplied for entity type {entity_type}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_to_import_type() {
        let plan = ImportPlan::from_configuration("Teams", &Value::Null).unwrap();
        assert_eq!(plan.entity_types, vec!["Teams".to_string()]);
        assert_eq!(plan.phase_timeout(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[test]
    fn test_parses_payloads_and_timeout() {
        let config = json!({
            "entity_types": ["Teams", "Applications"],
            "payloads": {
                "Teams": { "format": "csv", "content": "name\nCore\n" }
            },
            "phase_timeout_seconds": 60,
            "schedule_id": "ignored"
        });
        let plan = ImportPlan::from_configuration("Teams", &config).unwrap();
        assert_eq!(plan.entity_types.len(), 2);
        assert!(matches!(plan.payload("Teams").unwrap(), RawInput::Csv(_)));
        assert!(plan.payload("Applications").is_err());
        assert_eq!(plan.phase_timeout(Duration::from_secs(5)), Duration::from_secs(60));
    }

    #[test]
    fn test_import_all_rejected() {
        let err = ImportPlan::from_configuration("ALL", &Value::Null).unwrap_err();
        assert!(matches!(err, ImportError::NotImplemented(_)));
    }

    #[test]
    fn test_non_object_configuration_rejected() {
        assert!(ImportPlan::from_configuration("Teams", &json!([1, 2])).is_err());
    }
}
