mod common;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::strategies::*;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use import_orchestrator::config::{QueueConfig, SchedulerConfig};
use import_orchestrator::dependency::DependencyResolver;
use import_orchestrator::error::ImportError;
use import_orchestrator::events::EventPublisher;
use import_orchestrator::models::{
    EnforcementLevel, LockRequest, LockType, NewQueueEntry, ProgressTrackingEntry, ResourceKey,
    ScheduleDefinition, TenantResourceLimit,
};
use import_orchestrator::orchestration::{
    overall_percentage, BackoffPolicy, ImportSubmission, SubmissionReceipt, PHASE_STEP,
};
use import_orchestrator::queue::{QueueManager, TenantGovernor};
use import_orchestrator::scheduler::{FireOutcome, ImportSubmitter, Scheduler};
use import_orchestrator::store::{LockStore, MemoryStore, TenantLimitStore};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Accepts submissions without creating imports, or refuses them all
#[derive(Default)]
struct SwitchableSubmitter {
    failing: AtomicBool,
}

#[async_trait]
impl ImportSubmitter for SwitchableSubmitter {
    async fn submit(
        &self,
        _submission: ImportSubmission,
    ) -> import_orchestrator::error::Result<SubmissionReceipt> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ImportError::validation("queue refused"));
        }
        Ok(SubmissionReceipt {
            batch_id: Uuid::new_v4(),
            orchestration_id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            queue_position: 1,
        })
    }
}

proptest! {
    /// Property: higher priority first, FIFO within a priority
    #[test]
    fn dequeue_respects_priority_then_fifo(priorities in priorities_strategy()) {
        let dequeued = runtime().block_on(async {
            let store = Arc::new(MemoryStore::new());
            let queue = QueueManager::new(
                store.clone(),
                TenantGovernor::new(store),
                QueueConfig { max_concurrent: 100, ..QueueConfig::default() },
                EventPublisher::default(),
            );
            for priority in &priorities {
                queue
                    .enqueue(NewQueueEntry {
                        priority: *priority,
                        import_type: "Teams".into(),
                        tenant_id: "acme".into(),
                        ..Default::default()
                    })
                    .await
                    .unwrap();
            }
            let mut dequeued = Vec::new();
            while let Some(entry) = queue.dequeue_next("prop-worker").await.unwrap() {
                dequeued.push(entry);
            }
            dequeued
        });

        prop_assert_eq!(dequeued.len(), priorities.len());
        for pair in dequeued.windows(2) {
            prop_assert!(pair[0].priority >= pair[1].priority);
            if pair[0].priority == pair[1].priority {
                prop_assert!(pair[0].requested_at <= pair[1].requested_at);
            }
        }
    }

    /// Property: an EXCLUSIVE lock never coexists with another owner's lock
    #[test]
    fn granted_locks_are_mutually_exclusive(ops in lock_ops_strategy()) {
        let violations = runtime().block_on(async {
            let store = MemoryStore::new();
            let owners: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
            let keys: Vec<ResourceKey> = (0..3).map(|i| ResourceKey::entity_type(format!("E{i}"))).collect();
            let mut now = Utc::now();
            let mut violations = Vec::new();

            for op in ops {
                match op {
                    LockOp::Acquire { owner, key, lock_type, ttl_seconds } => {
                        let request = LockRequest {
                            key: keys[key].clone(),
                            lock_type,
                            owner_request_id: owners[owner],
                            ttl_ms: ttl_seconds * 1_000,
                        };
                        store.try_acquire(&request, now).await.unwrap();
                    }
                    LockOp::Release { owner, key } => {
                        store.release(&keys[key], owners[owner]).await.unwrap();
                    }
                    LockOp::Advance { seconds } => now += Duration::seconds(seconds),
                }

                for key in &keys {
                    let active = store.active_locks(key, now).await.unwrap();
                    let exclusive_owners: Vec<Uuid> = active
                        .iter()
                        .filter(|l| l.lock_type == LockType::Exclusive)
                        .map(|l| l.owner_request_id)
                        .collect();
                    if let Some(holder) = exclusive_owners.first() {
                        if active.iter().any(|l| l.owner_request_id != *holder) {
                            violations.push((key.to_string(), active.clone()));
                        }
                    }
                }
            }
            violations
        });
        prop_assert!(violations.is_empty(), "overlapping grants: {:?}", violations);
    }

    /// Property: every predecessor is imported before its dependents and
    /// compensated after them
    #[test]
    fn import_order_places_predecessors_first(graph in entity_graph_strategy()) {
        let resolver = DependencyResolver::new(graph.clone()).unwrap();
        let all: Vec<String> = graph.iter().map(|d| d.entity_type.clone()).collect();
        let order = resolver.import_order(&all).unwrap();
        let rollback = resolver.rollback_order(&all).unwrap();

        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, e)| (e.as_str(), i)).collect();
        for dependency in &graph {
            if let Some(parent) = &dependency.depends_on {
                prop_assert!(position[parent.as_str()] < position[dependency.entity_type.as_str()]);
            }
        }
        let reversed: Vec<String> = order.iter().rev().cloned().collect();
        prop_assert_eq!(rollback, reversed);
    }

    /// Property: backoff grows monotonically and never passes its ceiling
    #[test]
    fn backoff_is_monotonic_and_capped(
        base in 1..500u64,
        max in 500..10_000u64,
        multiplier in 1.0..4.0f64,
    ) {
        let policy = BackoffPolicy { base_delay_ms: base, max_delay_ms: max, multiplier };
        let mut previous = std::time::Duration::ZERO;
        for attempt in 0..20 {
            let delay = policy.delay_for(attempt);
            prop_assert!(delay >= previous);
            prop_assert!(delay.as_millis() as u64 <= max);
            previous = delay;
        }
    }

    /// Property: aggregate progress stays within 0-100
    #[test]
    fn overall_progress_is_bounded(percentages in prop::collection::vec(0.0..=100.0f64, 0..8)) {
        let orchestration_id = Uuid::new_v4();
        let entries: Vec<ProgressTrackingEntry> = percentages
            .iter()
            .map(|percentage| {
                let mut entry = ProgressTrackingEntry::start(orchestration_id, "stage", PHASE_STEP, 100);
                entry.advance(*percentage as i64);
                entry
            })
            .collect();
        let overall = overall_percentage(&entries, 5);
        prop_assert!((0.0..=100.0).contains(&overall));
    }

    /// Property: executions never fall behind successes plus failures,
    /// whatever mix of firings, refusals and completions a schedule sees
    #[test]
    fn schedule_counters_never_drift(ops in schedule_ops_strategy()) {
        let drift = runtime().block_on(async {
            let store = Arc::new(MemoryStore::new());
            let submitter = Arc::new(SwitchableSubmitter::default());
            let scheduler = Scheduler::new(
                store.clone(),
                TenantGovernor::new(store.clone()),
                submitter.clone(),
                SchedulerConfig::default(),
                EventPublisher::default(),
            );
            let mut clock = Utc::now();
            let schedule_id = scheduler
                .create_schedule(ScheduleDefinition {
                    name: "teams sync".into(),
                    import_type: "Teams".into(),
                    tenant_id: "acme".into(),
                    requester: "scheduler".into(),
                    schedule_expression: "*/5 * * * *".into(),
                    recurring: true,
                    priority: 5,
                    start_at: Some(clock),
                    import_configuration: serde_json::Value::Null,
                    resource_requirements: [("db_connections".to_string(), 1.0)].into_iter().collect(),
                    expected_duration_minutes: Some(10),
                    max_retries: 3,
                    retry_delay_minutes: 1,
                    timeout_minutes: None,
                })
                .await
                .unwrap();

            let mut outstanding: Vec<Uuid> = Vec::new();
            let mut finished: Vec<Uuid> = Vec::new();
            let mut fired = 0i32;
            let mut drift = Vec::new();

            for op in ops {
                match op {
                    ScheduleOp::Fire => {
                        let schedule = scheduler.get_schedule(schedule_id).await.unwrap().unwrap();
                        let due = schedule.next_execution_at.unwrap_or(clock).max(clock);
                        clock = due + Duration::seconds(1);
                        for outcome in scheduler.tick(clock).await.unwrap() {
                            match outcome {
                                FireOutcome::Submitted { execution_id, .. } => {
                                    fired += 1;
                                    outstanding.push(execution_id);
                                }
                                FireOutcome::SubmitFailed { execution_id, .. } => {
                                    fired += 1;
                                    finished.push(execution_id);
                                }
                                FireOutcome::Rejected { .. } | FireOutcome::Skipped { .. } => {}
                            }
                        }
                    }
                    ScheduleOp::Finish { pick, status } => {
                        if outstanding.is_empty() {
                            continue;
                        }
                        let execution_id = outstanding.remove(pick % outstanding.len());
                        clock += Duration::seconds(30);
                        scheduler
                            .handle_completion(execution_id, status, 1, None, clock)
                            .await
                            .unwrap();
                        finished.push(execution_id);
                    }
                    ScheduleOp::Replay { pick, status } => {
                        if finished.is_empty() {
                            continue;
                        }
                        let execution_id = finished[pick % finished.len()];
                        scheduler
                            .handle_completion(execution_id, status, 1, None, clock)
                            .await
                            .unwrap();
                    }
                    ScheduleOp::Limit { tight } => {
                        let value = if tight { 0.5 } else { 10.0 };
                        store
                            .put_limit(&TenantResourceLimit::new(
                                "acme",
                                "db_connections",
                                value,
                                EnforcementLevel::Hard,
                            ))
                            .await
                            .unwrap();
                    }
                    ScheduleOp::SubmitFailing(failing) => {
                        submitter.failing.store(failing, Ordering::SeqCst);
                    }
                }

                let schedule = scheduler.get_schedule(schedule_id).await.unwrap().unwrap();
                if !schedule.counters_consistent() || schedule.execution_count != fired {
                    drift.push(schedule);
                }
            }
            drift
        });
        prop_assert!(drift.is_empty(), "counters drifted: {:?}", drift);
    }
}
