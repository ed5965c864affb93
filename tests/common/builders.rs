//! Shared fixtures: an in-memory deployment plus payload builders.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use import_orchestrator::collaborators::{DelimitedParser, InMemoryStagingArea};
use import_orchestrator::config::{ImportConfig, LockConfig, QueueConfig, RetryConfig};
use import_orchestrator::dependency::DependencyResolver;
use import_orchestrator::models::EntityDependency;
use import_orchestrator::orchestration::{ImportSubmission, RunOutcome, SubmissionReceipt};
use import_orchestrator::service::{ImportService, ImportStatusReport};
use import_orchestrator::store::MemoryStore;
use import_orchestrator::BatchStatus;

/// Teams <- Applications <- Environments, Users <- Teams
pub fn entity_graph() -> Vec<EntityDependency> {
    vec![
        EntityDependency::root("Teams", 1),
        EntityDependency::depending_on("Applications", "Teams", 2),
        EntityDependency::depending_on("Environments", "Applications", 3),
        EntityDependency::depending_on("Users", "Teams", 4),
    ]
}

/// Short timings so retries and heartbeats play out within a test
pub fn fast_config() -> ImportConfig {
    ImportConfig {
        queue: QueueConfig {
            max_concurrent: 3,
            heartbeat_timeout_seconds: 2,
            heartbeat_interval_seconds: 1,
            poll_interval_ms: 10,
        },
        locks: LockConfig {
            default_ttl_seconds: 60,
            max_acquire_attempts: 200,
            backoff_base_ms: 5,
            backoff_max_ms: 25,
            backoff_multiplier: 2.0,
            reclaim_interval_seconds: 1,
        },
        retry: RetryConfig {
            max_transient_retries: 2,
            transient_backoff_ms: 5,
        },
        ..ImportConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub staging: Arc<InMemoryStagingArea>,
    pub service: ImportService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: ImportConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let staging = Arc::new(InMemoryStagingArea::new());
        let parser = DelimitedParser::new()
            .with_required_fields("Teams", &["name"])
            .with_required_fields("Applications", &["name", "team"]);
        let resolver = DependencyResolver::new(entity_graph()).expect("valid entity graph");

        let service = ImportService::new(store.clone(), resolver, Arc::new(parser), staging.clone(), config)
            .expect("valid configuration");
        Self {
            store,
            staging,
            service,
        }
    }

    pub async fn submit(&self, import_type: &str, priority: i32, configuration: Value) -> SubmissionReceipt {
        self.service
            .submit(submission(import_type, priority, configuration))
            .await
            .expect("submission accepted")
    }

    /// Dequeue and run one request on a fresh worker
    pub async fn run_next(&self) -> Option<(Uuid, RunOutcome)> {
        self.service
            .worker("test-worker")
            .process_next()
            .await
            .expect("worker iteration")
    }

    pub async fn status(&self, batch_id: Uuid) -> ImportStatusReport {
        self.service.status(batch_id).await.expect("batch exists")
    }

    /// Poll until the batch reaches a terminal status
    pub async fn wait_terminal(&self, batch_id: Uuid, timeout: Duration) -> ImportStatusReport {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let report = self.status(batch_id).await;
            if report.status != BatchStatus::InProgress {
                return report;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "batch {batch_id} still in progress: {report:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn submission(import_type: &str, priority: i32, configuration: Value) -> ImportSubmission {
    ImportSubmission {
        import_type: import_type.to_string(),
        source_descriptor: format!("upload://{}.csv", import_type.to_lowercase()),
        priority,
        requester: "alice".to_string(),
        tenant_id: "acme".to_string(),
        configuration,
        ..Default::default()
    }
}

pub fn csv(content: &str) -> Value {
    json!({ "format": "csv", "content": content })
}

/// Plan importing only Teams from a CSV with `count` rows
pub fn teams_plan(count: usize) -> Value {
    let mut content = String::from("name\n");
    for index in 0..count {
        content.push_str(&format!("Team {index}\n"));
    }
    json!({ "payloads": { "Teams": csv(&content) } })
}

/// Plan importing Teams and Applications together
pub fn teams_and_applications_plan() -> Value {
    json!({
        "entity_types": ["Applications", "Teams"],
        "payloads": {
            "Teams": csv("name\nCore\nPayments\n"),
            "Applications": csv("name,team\nledger,Payments\nportal,Core\nsearch,Core\n"),
        }
    })
}
