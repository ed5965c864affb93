use config::{Config, File};
use serde::Deserialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ImportError, Result};
use crate::models::EntityDependency;

/// On-disk shape of an entity graph file (`[[entities]]` tables)
#[derive(Debug, Deserialize)]
struct EntityGraphFile {
    #[serde(default)]
    entities: Vec<EntityDependency>,
}

/// Topologically sorted view of the entity dependency graph
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    dependencies: BTreeMap<String, EntityDependency>,
    /// Every configured entity type, predecessors first
    order: Vec<String>,
    position: HashMap<String, usize>,
}

impl DependencyResolver {
    /// Build the resolver, rejecting duplicates, cycles and required edges
    /// pointing at unknown entity types
    pub fn new(dependencies: Vec<EntityDependency>) -> Result<Self> {
        let mut by_type = BTreeMap::new();
        for dependency in dependencies {
            let entity_type = dependency.entity_type.clone();
            if by_type.insert(entity_type.clone(), dependency).is_some() {
                return Err(ImportError::Configuration(format!(
                    "entity type {entity_type} is configured more than once"
                )));
            }
        }

        for dependency in by_type.values() {
            if let Some(parent) = &dependency.depends_on {
                if parent == &dependency.entity_type {
                    return Err(ImportError::Configuration(format!(
                        "entity type {parent} depends on itself"
                    )));
                }
                if dependency.required && !by_type.contains_key(parent) {
                    return Err(ImportError::Configuration(format!(
                        "entity type {} requires unknown predecessor {parent}",
                        dependency.entity_type
                    )));
                }
            }
        }

        let order = topological_order(&by_type)?;
        let position = order
            .iter()
            .enumerate()
            .map(|(index, entity)| (entity.clone(), index))
            .collect();

        debug!(order = ?order, "Resolved entity import order");
        Ok(Self {
            dependencies: by_type,
            order,
            position,
        })
    }

    /// Load the graph from a TOML, YAML or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let graph: EntityGraphFile = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        info!(
            path = %path.display(),
            entities = graph.entities.len(),
            "Loaded entity dependency graph"
        );
        Self::new(graph.entities)
    }

    /// Full configured order, predecessors first
    pub fn global_order(&self) -> &[String] {
        &self.order
    }

    pub fn dependency(&self, entity_type: &str) -> Option<&EntityDependency> {
        self.dependencies.get(entity_type)
    }

    /// Order a subset of entity types for import; unknown types are a
    /// validation error
    pub fn import_order(&self, entity_types: &[String]) -> Result<Vec<String>> {
        let mut unique: Vec<&String> = entity_types
            .iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if let Some(unknown) = unique.iter().find(|e| !self.position.contains_key(e.as_str())) {
            return Err(ImportError::validation(format!(
                "unknown entity type {unknown}"
            )));
        }
        unique.sort_by_key(|entity| self.position[entity.as_str()]);
        Ok(unique.into_iter().cloned().collect())
    }

    /// Reverse of [`import_order`](Self::import_order), used for compensation
    pub fn rollback_order(&self, entity_types: &[String]) -> Result<Vec<String>> {
        let mut order = self.import_order(entity_types)?;
        order.reverse();
        Ok(order)
    }

    /// Entity types that must be present before `entity_type` is imported,
    /// following required edges transitively
    pub fn required_predecessors(&self, entity_type: &str) -> Result<BTreeSet<String>> {
        let mut current = self.dependencies.get(entity_type).ok_or_else(|| {
            ImportError::validation(format!("unknown entity type {entity_type}"))
        })?;

        let mut predecessors = BTreeSet::new();
        while let Some(parent) = current.depends_on.as_ref().filter(|_| current.required) {
            if !predecessors.insert(parent.clone()) {
                break;
            }
            match self.dependencies.get(parent) {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(predecessors)
    }

    pub fn rollback_query(&self, entity_type: &str) -> Option<&str> {
        self.dependencies
            .get(entity_type)
            .and_then(|dep| dep.rollback_query.as_deref())
    }
}

/// Kahn's algorithm; ties broken by `(import_order, entity_type)` so the
/// result is deterministic
fn topological_order(dependencies: &BTreeMap<String, EntityDependency>) -> Result<Vec<String>> {
    let mut indegree: HashMap<&str, usize> = dependencies.keys().map(|k| (k.as_str(), 0)).collect();
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();

    for dependency in dependencies.values() {
        if let Some(parent) = dependency.depends_on.as_deref() {
            if dependencies.contains_key(parent) {
                *indegree.entry(dependency.entity_type.as_str()).or_default() += 1;
                children
                    .entry(parent)
                    .or_default()
                    .push(dependency.entity_type.as_str());
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<(i32, &str)>> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(entity, _)| Reverse((dependencies[*entity].import_order, *entity)))
        .collect();

    let mut order = Vec::with_capacity(dependencies.len());
    while let Some(Reverse((_, entity))) = ready.pop() {
        order.push(entity.to_string());
        for child in children.get(entity).into_iter().flatten() {
            if let Some(degree) = indegree.get_mut(child) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse((dependencies[*child].import_order, *child)));
                }
            }
        }
    }

    if order.len() != dependencies.len() {
        let cyclic: Vec<&str> = indegree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(entity, _)| *entity)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        return Err(ImportError::Configuration(format!(
            "entity dependency cycle involving {}",
            cyclic.join(", ")
        )));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Vec<EntityDependency> {
        vec![
            EntityDependency::depending_on("Users", "Environments", 4),
            EntityDependency::root("Teams", 1),
            EntityDependency::depending_on("Environments", "Applications", 3),
            EntityDependency::depending_on("Applications", "Teams", 2),
        ]
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_global_order_follows_edges() {
        let resolver = DependencyResolver::new(chain()).unwrap();
        assert_eq!(
            resolver.global_order(),
            names(&["Teams", "Applications", "Environments", "Users"]).as_slice()
        );
    }

    #[test]
    fn test_subset_and_reverse_order() {
        let resolver = DependencyResolver::new(chain()).unwrap();
        let subset = names(&["Users", "Teams", "Users"]);
        assert_eq!(resolver.import_order(&subset).unwrap(), names(&["Teams", "Users"]));
        assert_eq!(resolver.rollback_order(&subset).unwrap(), names(&["Users", "Teams"]));
    }

    #[test]
    fn test_required_predecessors_are_transitive() {
        let resolver = DependencyResolver::new(chain()).unwrap();
        let preds = resolver.required_predecessors("Environments").unwrap();
        let expected: BTreeSet<String> = ["Applications", "Teams"].iter().map(|s| s.to_string()).collect();
        assert_eq!(preds, expected);
        assert!(resolver.required_predecessors("Teams").unwrap().is_empty());
        assert!(matches!(
            resolver.required_predecessors("Nope"),
            Err(ImportError::Validation(_))
        ));
    }

    #[test]
    fn test_optional_edge_stops_requirement() {
        let mut deps = chain();
        deps[2] = EntityDependency::depending_on("Environments", "Applications", 3).optional();
        let resolver = DependencyResolver::new(deps).unwrap();
        assert!(resolver.required_predecessors("Environments").unwrap().is_empty());
        // Ordering still honours the optional edge
        assert_eq!(
            resolver.import_order(&names(&["Environments", "Applications"])).unwrap(),
            names(&["Applications", "Environments"])
        );
    }

    #[test]
    fn test_cycle_is_configuration_error() {
        let deps = vec![
            EntityDependency::depending_on("A", "B", 1),
            EntityDependency::depending_on("B", "A", 2),
            EntityDependency::root("C", 3),
        ];
        match DependencyResolver::new(deps) {
            Err(ImportError::Configuration(message)) => assert!(message.contains("A, B")),
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_required_predecessor() {
        let deps = vec![EntityDependency::depending_on("Applications", "Teams", 2)];
        assert!(matches!(
            DependencyResolver::new(deps),
            Err(ImportError::Configuration(_))
        ));

        let optional = vec![EntityDependency::depending_on("Applications", "Teams", 2).optional()];
        assert!(DependencyResolver::new(optional).is_ok());
    }

    #[test]
    fn test_unknown_entity_in_import_is_validation_error() {
        let resolver = DependencyResolver::new(chain()).unwrap();
        assert!(matches!(
            resolver.import_order(&names(&["Widgets"])),
            Err(ImportError::Validation(_))
        ));
    }

    #[test]
    fn test_from_file_reads_entity_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entities.toml");
        std::fs::write(
            &path,
            r#"
[[entities]]
entity_type = "Applications"
depends_on = "Teams"
import_order = 2

[[entities]]
entity_type = "Teams"
import_order = 1
rollback_query = "DELETE FROM teams WHERE batch_id = $1"
"#,
        )
        .unwrap();

        let resolver = DependencyResolver::from_file(&path).unwrap();
        assert_eq!(resolver.global_order(), names(&["Teams", "Applications"]).as_slice());
        assert!(resolver.dependency("Applications").unwrap().required);
        assert!(resolver.rollback_query("Teams").is_some());
    }

    #[test]
    fn test_from_file_missing_is_configuration_error() {
        let err = DependencyResolver::from_file("/nonexistent/entities.toml").unwrap_err();
        assert!(matches!(err, ImportError::Configuration(_)));
    }
}
