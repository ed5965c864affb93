//! Schedules driving real imports through the worker.

mod common;

use chrono::{Duration, Utc};
use common::*;
use serde_json::Value;

use import_orchestrator::error::ImportError;
use import_orchestrator::models::{
    EnforcementLevel, ExecutionStatus, ReservationStatus, ScheduleDefinition, ScheduleStatus,
    ScheduledImport, TenantResourceLimit,
};
use import_orchestrator::orchestration::RunOutcome;
use import_orchestrator::scheduler::FireOutcome;
use import_orchestrator::store::{ScheduleStore, TenantLimitStore};

fn definition(expression: &str, recurring: bool, configuration: Value) -> ScheduleDefinition {
    ScheduleDefinition {
        name: "teams sync".to_string(),
        import_type: "Teams".to_string(),
        tenant_id: "acme".to_string(),
        requester: "scheduler".to_string(),
        schedule_expression: expression.to_string(),
        recurring,
        priority: 8,
        start_at: Some(Utc::now()),
        import_configuration: configuration,
        resource_requirements: [("db_connections".to_string(), 1.0)].into_iter().collect(),
        expected_duration_minutes: Some(15),
        max_retries: 1,
        retry_delay_minutes: 10,
        timeout_minutes: None,
    }
}

fn assert_counters(schedule: &ScheduledImport) {
    assert!(
        schedule.execution_count >= schedule.success_count + schedule.failure_count,
        "counters drifted: {schedule:?}"
    );
}

#[tokio::test]
async fn test_recurring_schedule_fires_and_reschedules() {
    let harness = Harness::new();
    let scheduler = harness.service.scheduler();
    let schedule_id = scheduler
        .create_schedule(definition("*/5 * * * *", true, teams_plan(2)))
        .await
        .unwrap();

    let now = Utc::now() + Duration::seconds(1);
    let outcomes = scheduler.tick(now).await.unwrap();
    let FireOutcome::Submitted { request_id, execution_id, .. } = outcomes[0] else {
        panic!("expected a submission, got {outcomes:?}");
    };

    let (ran, outcome) = harness.run_next().await.unwrap();
    assert_eq!(ran, request_id);
    assert!(matches!(outcome, RunOutcome::Completed { .. }));

    let schedule = scheduler.get_schedule(schedule_id).await.unwrap().unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Scheduled);
    assert_eq!(schedule.execution_count, 1);
    assert_eq!(schedule.success_count, 1);
    assert!(schedule.next_execution_at.unwrap() > now);
    assert_counters(&schedule);

    let history = scheduler.execution_history(schedule_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].execution_id, execution_id);
    assert_eq!(history[0].status, ExecutionStatus::Completed);
    assert_eq!(history[0].records_processed, 2);
    assert_eq!(history[0].request_id, Some(request_id));

    let reservations = harness.store.reservations_for(schedule_id).await.unwrap();
    assert!(reservations
        .iter()
        .all(|r| r.status == ReservationStatus::Released));
}

#[tokio::test]
async fn test_one_shot_schedule_completes() {
    let harness = Harness::new();
    let scheduler = harness.service.scheduler();
    let schedule_id = scheduler
        .create_schedule(definition("@once", false, teams_plan(1)))
        .await
        .unwrap();

    scheduler.tick(Utc::now() + Duration::seconds(1)).await.unwrap();
    harness.run_next().await.unwrap();

    let schedule = scheduler.get_schedule(schedule_id).await.unwrap().unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Completed);
    assert_eq!(schedule.next_execution_at, None);
    assert!(scheduler
        .tick(Utc::now() + Duration::days(1))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_failed_run_is_retried_then_fails_schedule() {
    let harness = Harness::new();
    harness.staging.fail_promotion_of("Teams");
    let scheduler = harness.service.scheduler();
    let schedule_id = scheduler
        .create_schedule(definition("0 3 * * *", true, teams_plan(1)))
        .await
        .unwrap();

    let first_fire = Utc::now() + Duration::seconds(1);
    scheduler.tick(first_fire).await.unwrap();
    let (_, outcome) = harness.run_next().await.unwrap();
    assert!(matches!(outcome, RunOutcome::RolledBack { .. }));

    let schedule = scheduler.get_schedule(schedule_id).await.unwrap().unwrap();
    assert_eq!(schedule.failure_count, 1);
    assert_eq!(schedule.status, ScheduleStatus::Scheduled);
    assert_counters(&schedule);
    let retry_at = schedule.next_execution_at.expect("retry scheduled");

    scheduler.tick(retry_at + Duration::seconds(1)).await.unwrap();
    harness.run_next().await.unwrap();

    let schedule = scheduler.get_schedule(schedule_id).await.unwrap().unwrap();
    assert_eq!(schedule.execution_count, 2);
    assert_eq!(schedule.failure_count, 2);
    assert_eq!(schedule.status, ScheduleStatus::Failed);
    assert_counters(&schedule);

    let history = scheduler.execution_history(schedule_id).await.unwrap();
    assert!(history.iter().all(|e| e.status == ExecutionStatus::Failed));
}

#[tokio::test]
async fn test_reservation_rejected_by_hard_limit() {
    let harness = Harness::new();
    harness
        .store
        .put_limit(&TenantResourceLimit::new(
            "acme",
            "db_connections",
            1.0,
            EnforcementLevel::Hard,
        ))
        .await
        .unwrap();
    let scheduler = harness.service.scheduler();

    let first = scheduler
        .create_schedule(definition("*/10 * * * *", true, teams_plan(1)))
        .await
        .unwrap();
    let second = scheduler
        .create_schedule(definition("*/10 * * * *", true, teams_plan(1)))
        .await
        .unwrap();

    let outcomes = scheduler.tick(Utc::now() + Duration::seconds(1)).await.unwrap();
    let submitted = outcomes
        .iter()
        .filter(|o| matches!(o, FireOutcome::Submitted { .. }))
        .count();
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, FireOutcome::Rejected { .. }))
        .count();
    assert_eq!((submitted, rejected), (1, 1));

    for schedule_id in [first, second] {
        let schedule = scheduler.get_schedule(schedule_id).await.unwrap().unwrap();
        assert_counters(&schedule);
    }
}

#[tokio::test]
async fn test_hard_tenant_limit_rejects_submission() {
    let harness = Harness::new();
    harness
        .store
        .put_limit(&TenantResourceLimit::new(
            "acme",
            "db_connections",
            1.0,
            EnforcementLevel::Hard,
        ))
        .await
        .unwrap();

    let mut request = submission("Teams", 5, teams_plan(1));
    request
        .resource_requirements
        .insert("db_connections".to_string(), 2.0);
    let err = harness.service.submit(request).await.unwrap_err();
    assert!(matches!(err, ImportError::ResourceLimitExceeded { .. }), "{err:?}");
    assert!(harness.run_next().await.is_none());
}
