use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::governor::TenantGovernor;
use crate::config::QueueConfig;
use crate::constants::{MAX_PRIORITY, MIN_PRIORITY};
use crate::error::{ImportError, Result};
use crate::events::{EventPublisher, ImportEvent};
use crate::logging::log_queue_operation;
use crate::models::{CancelOutcome, NewQueueEntry, QueueEntry, QueueStatus};
use crate::store::QueueStore;

/// Owns the queue entry lifecycle: admission, dispatch, cancellation and
/// abandonment recovery
#[derive(Clone)]
pub struct QueueManager {
    store: Arc<dyn QueueStore>,
    governor: TenantGovernor,
    config: QueueConfig,
    events: EventPublisher,
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QueueManager {
    pub fn new(
        store: Arc<dyn QueueStore>,
        governor: TenantGovernor,
        config: QueueConfig,
        events: EventPublisher,
    ) -> Self {
        Self {
            store,
            governor,
            config,
            events,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Admit a request into the queue and return it with its position.
    ///
    /// Tenant ceilings are checked here; the concurrency bound is not, so an
    /// accepted request always gets a position.
    #[instrument(skip(self, request), fields(import_type = %request.import_type, tenant = %request.tenant_id))]
    pub async fn enqueue(&self, request: NewQueueEntry) -> Result<QueueEntry> {
        Self::validate_request(&request)?;
        self.check_tenant_limits(&request).await?;

        let mut entry = QueueEntry::new(request, Utc::now());
        let position = self.store.insert_entry(&entry).await?;
        entry.queue_position = Some(position);

        log_queue_operation(
            "enqueue",
            entry.request_id,
            Some(entry.priority),
            entry.status.as_str(),
            Some(&format!("position {position}")),
        );
        self.events.publish(ImportEvent::RequestEnqueued {
            request_id: entry.request_id,
            priority: entry.priority,
            queue_position: position,
        });
        Ok(entry)
    }

    /// Shape checks that need no store access
    pub fn validate_request(request: &NewQueueEntry) -> Result<()> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&request.priority) {
            return Err(ImportError::validation(format!(
                "priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}, got {}",
                request.priority
            )));
        }
        if request.import_type.trim().is_empty() {
            return Err(ImportError::validation("import type must not be empty"));
        }
        Ok(())
    }

    async fn check_tenant_limits(&self, request: &NewQueueEntry) -> Result<()> {
        if request.resource_requirements.is_empty() {
            return Ok(());
        }
        let limits = self.governor.limits_for(&request.tenant_id).await?;
        if limits.is_empty() {
            return Ok(());
        }

        let mut usage = HashMap::new();
        for limit in &limits {
            if request.resource_requirements.contains_key(&limit.resource_type)
                && !usage.contains_key(&limit.resource_type)
            {
                let in_use = self
                    .store
                    .tenant_usage(&request.tenant_id, &limit.resource_type)
                    .await?;
                usage.insert(limit.resource_type.clone(), in_use);
            }
        }

        TenantGovernor::enforce(
            &request.tenant_id,
            &limits,
            &request.resource_requirements,
            |resource_type| usage.get(resource_type).copied().unwrap_or(0.0),
        )
    }

    /// Claim the next entry for `worker_id`, or `None` when the queue is
    /// empty or the concurrency bound is reached
    #[instrument(skip(self))]
    pub async fn dequeue_next(&self, worker_id: &str) -> Result<Option<QueueEntry>> {
        let claimed = self
            .store
            .claim_next(self.config.max_concurrent, worker_id, Utc::now())
            .await?;

        if let Some(entry) = &claimed {
            log_queue_operation(
                "dequeue",
                entry.request_id,
                Some(entry.priority),
                entry.status.as_str(),
                Some(worker_id),
            );
            self.events.publish(ImportEvent::RequestDequeued {
                request_id: entry.request_id,
                worker_id: worker_id.to_string(),
            });
        }
        Ok(claimed)
    }

    /// Cancel a queued entry or flag a processing one for cooperative stop
    #[instrument(skip(self))]
    pub async fn cancel(&self, request_id: Uuid) -> Result<CancelOutcome> {
        let outcome = self.store.request_cancel(request_id, Utc::now()).await?;
        log_queue_operation("cancel", request_id, None, &format!("{outcome:?}"), None);
        match outcome {
            CancelOutcome::Cancelled => self.events.publish(ImportEvent::RequestFinished {
                request_id,
                status: QueueStatus::Cancelled,
            }),
            CancelOutcome::CancellationRequested => {
                self.events.publish(ImportEvent::CancelRequested { request_id })
            }
            CancelOutcome::AlreadyFinished => {}
        }
        Ok(outcome)
    }

    pub async fn is_cancel_requested(&self, request_id: Uuid) -> Result<bool> {
        self.store.is_cancel_requested(request_id).await
    }

    /// Renew the worker's claim; false means the entry was taken away
    pub async fn heartbeat(&self, request_id: Uuid, worker_id: &str) -> Result<bool> {
        let renewed = self.store.heartbeat(request_id, worker_id, Utc::now()).await?;
        if !renewed {
            warn!(request_id = %request_id, worker_id = %worker_id, "Heartbeat rejected");
        }
        Ok(renewed)
    }

    /// Move a processing entry to its terminal queue status. Returns false,
    /// leaving the entry untouched, when `worker_id` no longer holds it.
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        request_id: Uuid,
        worker_id: &str,
        status: QueueStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        if !status.is_terminal() {
            return Err(ImportError::validation(format!(
                "queue entries finish with a terminal status, got {status}"
            )));
        }
        let finished = self
            .store
            .finish_entry(request_id, worker_id, status, error_message, Utc::now())
            .await?;
        if finished {
            log_queue_operation("finish", request_id, None, status.as_str(), error_message);
            self.events
                .publish(ImportEvent::RequestFinished { request_id, status });
        } else {
            warn!(request_id = %request_id, worker_id = %worker_id, "Finish rejected, entry is not held by this worker");
        }
        Ok(finished)
    }

    /// Return a processing entry to the queue, e.g. while a prerequisite
    /// orchestration is still running
    pub async fn requeue(&self, request_id: Uuid, worker_id: &str, reason: &str) -> Result<bool> {
        let requeued = self.store.requeue_entry(request_id, worker_id).await?;
        if requeued {
            debug!(request_id = %request_id, reason = %reason, "Request requeued");
            self.events.publish(ImportEvent::RequestRequeued {
                request_id,
                reason: reason.to_string(),
            });
        }
        Ok(requeued)
    }

    pub async fn requeue_abandoned(&self) -> Result<Vec<Uuid>> {
        self.requeue_abandoned_at(Utc::now()).await
    }

    /// Revert entries whose heartbeat is older than the configured timeout
    pub async fn requeue_abandoned_at(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let deadline = now - self.config.heartbeat_timeout();
        let requeued = self.store.requeue_abandoned(deadline).await?;
        if !requeued.is_empty() {
            info!(count = requeued.len(), "Requeued abandoned requests");
        }
        for request_id in &requeued {
            log_queue_operation("requeue_abandoned", *request_id, None, "QUEUED", None);
            self.events.publish(ImportEvent::RequestRequeued {
                request_id: *request_id,
                reason: "heartbeat expired".to_string(),
            });
        }
        Ok(requeued)
    }

    pub async fn get(&self, request_id: Uuid) -> Result<Option<QueueEntry>> {
        self.store.get_entry(request_id).await
    }

    pub async fn list(&self, status: Option<QueueStatus>) -> Result<Vec<QueueEntry>> {
        self.store.list_entries(status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnforcementLevel, ResourceAmounts, TenantResourceLimit};
    use crate::store::{MemoryStore, TenantLimitStore};
    use chrono::Duration;

    fn manager(store: Arc<MemoryStore>, max_concurrent: usize) -> QueueManager {
        QueueManager::new(
            store.clone(),
            TenantGovernor::new(store),
            QueueConfig {
                max_concurrent,
                ..QueueConfig::default()
            },
            EventPublisher::default(),
        )
    }

    fn request(priority: i32) -> NewQueueEntry {
        NewQueueEntry {
            priority,
            import_type: "Teams".into(),
            requester: "alice".into(),
            tenant_id: "acme".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_priority_bounds_enforced() {
        let queue = manager(Arc::new(MemoryStore::new()), 3);
        assert!(matches!(
            queue.enqueue(request(0)).await,
            Err(ImportError::Validation(_))
        ));
        assert!(matches!(
            queue.enqueue(request(21)).await,
            Err(ImportError::Validation(_))
        ));
        assert_eq!(queue.enqueue(request(20)).await.unwrap().queue_position, Some(1));
    }

    #[tokio::test]
    async fn test_hard_tenant_limit_rejects_enqueue() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_limit(&TenantResourceLimit::new(
                "acme",
                "db_connections",
                3.0,
                EnforcementLevel::Hard,
            ))
            .await
            .unwrap();
        let queue = manager(store, 3);

        let mut first = request(5);
        first.resource_requirements = ResourceAmounts::from([("db_connections".into(), 2.0)]);
        queue.enqueue(first.clone()).await.unwrap();

        let err = queue.enqueue(first).await.unwrap_err();
        assert!(matches!(err, ImportError::ResourceLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_dequeue_respects_priority_and_bound() {
        let queue = manager(Arc::new(MemoryStore::new()), 1);
        let low = queue.enqueue(request(2)).await.unwrap();
        let high = queue.enqueue(request(9)).await.unwrap();

        let first = queue.dequeue_next("w1").await.unwrap().unwrap();
        assert_eq!(first.request_id, high.request_id);
        assert!(queue.dequeue_next("w2").await.unwrap().is_none());

        queue
            .complete(high.request_id, "w1", QueueStatus::Completed, None)
            .await
            .unwrap();
        let second = queue.dequeue_next("w2").await.unwrap().unwrap();
        assert_eq!(second.request_id, low.request_id);
    }

    #[tokio::test]
    async fn test_abandoned_entry_requeued() {
        let store = Arc::new(MemoryStore::new());
        let queue = manager(store.clone(), 3);
        let entry = queue.enqueue(request(5)).await.unwrap();
        queue.dequeue_next("w1").await.unwrap().unwrap();

        let later = Utc::now() + Duration::seconds(queue.config().heartbeat_timeout_seconds as i64 + 1);
        let requeued = queue.requeue_abandoned_at(later).await.unwrap();
        assert_eq!(requeued, vec![entry.request_id]);

        let reloaded = queue.get(entry.request_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, QueueStatus::Queued);
        assert_eq!(reloaded.queue_position, Some(1));
    }

    #[tokio::test]
    async fn test_complete_requires_terminal_status() {
        let queue = manager(Arc::new(MemoryStore::new()), 3);
        let entry = queue.enqueue(request(5)).await.unwrap();
        assert!(queue
            .complete(entry.request_id, "w1", QueueStatus::Queued, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_stale_worker_cannot_settle_reclaimed_entry() {
        let queue = manager(Arc::new(MemoryStore::new()), 3);
        let entry = queue.enqueue(request(5)).await.unwrap();
        queue.dequeue_next("w1").await.unwrap().unwrap();

        let later = Utc::now() + Duration::seconds(queue.config().heartbeat_timeout_seconds as i64 + 1);
        queue.requeue_abandoned_at(later).await.unwrap();
        let reclaimed = queue.dequeue_next("w2").await.unwrap().unwrap();
        assert_eq!(reclaimed.attempts, 2);

        assert!(!queue
            .complete(entry.request_id, "w1", QueueStatus::Failed, Some("stale"))
            .await
            .unwrap());
        assert!(!queue.requeue(entry.request_id, "w1", "stale").await.unwrap());

        let current = queue.get(entry.request_id).await.unwrap().unwrap();
        assert_eq!(current.status, QueueStatus::Processing);
        assert_eq!(current.assigned_worker.as_deref(), Some("w2"));
        assert!(current.error_message.is_none());

        assert!(queue
            .complete(entry.request_id, "w2", QueueStatus::Completed, None)
            .await
            .unwrap());
    }
}
