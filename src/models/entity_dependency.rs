use serde::{Deserialize, Serialize};

/// Static import-ordering configuration for one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDependency {
    pub entity_type: String,
    /// Entity type that must be imported first
    #[serde(default)]
    pub depends_on: Option<String>,
    pub import_order: i32,
    /// Whether `depends_on` must already be present before importing
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub validation_query: Option<String>,
    #[serde(default)]
    pub rollback_query: Option<String>,
}

fn default_required() -> bool {
    true
}

impl EntityDependency {
    pub fn root(entity_type: impl Into<String>, import_order: i32) -> Self {
        Self {
            entity_type: entity_type.into(),
            depends_on: None,
            import_order,
            required: true,
            validation_query: None,
            rollback_query: None,
        }
    }

    pub fn depending_on(
        entity_type: impl Into<String>,
        depends_on: impl Into<String>,
        import_order: i32,
    ) -> Self {
        Self {
            depends_on: Some(depends_on.into()),
            ..Self::root(entity_type, import_order)
        }
    }

    pub fn with_rollback_query(mut self, query: impl Into<String>) -> Self {
        self.rollback_query = Some(query.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}
