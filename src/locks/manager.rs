use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::LockConfig;
use crate::error::{ImportError, Result};
use crate::events::{EventPublisher, ImportEvent};
use crate::logging::log_lock_operation;
use crate::models::{LockOutcome, LockRequest, LockType, ResourceKey, ResourceLock};
use crate::orchestration::backoff::BackoffPolicy;
use crate::store::LockStore;

/// Grants, releases and reclaims resource locks
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    config: LockConfig,
    backoff: BackoffPolicy,
    events: EventPublisher,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, config: LockConfig, events: EventPublisher) -> Self {
        let backoff = BackoffPolicy::from_lock_config(&config);
        Self {
            store,
            config,
            backoff,
            events,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl()
    }

    /// Single atomic acquire attempt. A miss triggers an opportunistic sweep
    /// of expired locks so abandoned holders do not starve the waiter.
    #[instrument(skip(self), fields(resource = %key))]
    pub async fn acquire(
        &self,
        key: &ResourceKey,
        lock_type: LockType,
        owner_request_id: Uuid,
        ttl: Duration,
    ) -> Result<LockOutcome> {
        if ttl < Duration::milliseconds(1) {
            return Err(ImportError::validation(format!(
                "lock TTL must be at least 1ms, got {}ms",
                ttl.num_milliseconds()
            )));
        }

        let request = LockRequest {
            key: key.clone(),
            lock_type,
            owner_request_id,
            ttl_ms: ttl.num_milliseconds(),
        };

        let outcome = self.store.try_acquire(&request, Utc::now()).await?;
        match &outcome {
            LockOutcome::Granted(lock) => {
                log_lock_operation("acquire", &key.to_string(), owner_request_id, "granted");
                debug!(expires_at = %lock.expires_at, "Lock granted");
                self.events.publish(ImportEvent::LockGranted {
                    resource: key.to_string(),
                    owner: owner_request_id,
                });
            }
            LockOutcome::Conflict { holders } => {
                log_lock_operation("acquire", &key.to_string(), owner_request_id, "conflict");
                self.events.publish(ImportEvent::LockConflict {
                    resource: key.to_string(),
                    owner: owner_request_id,
                    holders: holders.iter().map(|h| h.owner_request_id).collect(),
                });
                self.reclaim_expired().await?;
            }
        }
        Ok(outcome)
    }

    /// Acquire `EXCLUSIVE` locks on `keys` in the given order, retrying each
    /// conflict with bounded backoff.
    ///
    /// Callers must pass keys in dependency order; that fixed total order is
    /// what keeps concurrent orchestrations from waiting on each other in a
    /// cycle. On exhaustion every lock granted by this call is released
    /// before the `LockConflict` error is returned.
    #[instrument(skip(self, keys), fields(owner = %owner_request_id, keys = keys.len()))]
    pub async fn acquire_all(
        &self,
        keys: &[ResourceKey],
        owner_request_id: Uuid,
        ttl: Duration,
    ) -> Result<Vec<ResourceLock>> {
        let mut granted: Vec<ResourceLock> = Vec::with_capacity(keys.len());

        for key in keys {
            match self.acquire_with_retry(key, owner_request_id, ttl).await {
                Ok(lock) => granted.push(lock),
                Err(e) => {
                    for lock in &granted {
                        if let Err(release_err) = self.release(&lock.key(), owner_request_id).await {
                            warn!(
                                resource = %lock.key(),
                                error = %release_err,
                                "Failed to release partial lock set"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        info!(count = granted.len(), "Acquired lock set");
        Ok(granted)
    }

    async fn acquire_with_retry(
        &self,
        key: &ResourceKey,
        owner_request_id: Uuid,
        ttl: Duration,
    ) -> Result<ResourceLock> {
        let max_attempts = self.config.max_acquire_attempts.max(1);
        for attempt in 0..max_attempts {
            match self
                .acquire(key, LockType::Exclusive, owner_request_id, ttl)
                .await?
            {
                LockOutcome::Granted(lock) => return Ok(lock),
                LockOutcome::Conflict { .. } if attempt + 1 < max_attempts => {
                    let delay = self.backoff.delay_for(attempt);
                    debug!(
                        resource = %key,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Lock busy, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                LockOutcome::Conflict { .. } => {}
            }
        }

        warn!(resource = %key, attempts = max_attempts, "Lock acquisition exhausted");
        Err(ImportError::LockConflict {
            resource: key.to_string(),
            attempts: max_attempts,
        })
    }

    pub async fn release(&self, key: &ResourceKey, owner_request_id: Uuid) -> Result<bool> {
        let released = self.store.release(key, owner_request_id).await?;
        if released {
            log_lock_operation("release", &key.to_string(), owner_request_id, "released");
            self.events.publish(ImportEvent::LockReleased {
                owner: owner_request_id,
                count: 1,
            });
        }
        Ok(released)
    }

    #[instrument(skip(self))]
    pub async fn release_all(&self, owner_request_id: Uuid) -> Result<u64> {
        let count = self.store.release_all(owner_request_id).await?;
        if count > 0 {
            log_lock_operation("release_all", "*", owner_request_id, "released");
            self.events.publish(ImportEvent::LockReleased {
                owner: owner_request_id,
                count,
            });
        }
        Ok(count)
    }

    /// Push the expiry of every lock held by `owner_request_id` to now + TTL
    pub async fn extend(&self, owner_request_id: Uuid, ttl: Duration) -> Result<u64> {
        self.store
            .extend_all(owner_request_id, Utc::now() + ttl)
            .await
    }

    pub async fn reclaim_expired(&self) -> Result<Vec<ResourceLock>> {
        self.reclaim_expired_at(Utc::now()).await
    }

    pub async fn reclaim_expired_at(&self, now: DateTime<Utc>) -> Result<Vec<ResourceLock>> {
        let reclaimed = self.store.reclaim_expired(now).await?;
        if !reclaimed.is_empty() {
            info!(count = reclaimed.len(), "Reclaimed expired locks");
            self.events.publish(ImportEvent::LocksReclaimed {
                count: reclaimed.len(),
            });
        }
        Ok(reclaimed)
    }

    pub async fn locks_held_by(&self, owner_request_id: Uuid) -> Result<Vec<ResourceLock>> {
        self.store.locks_held_by(owner_request_id).await
    }

    pub async fn active_locks(&self, key: &ResourceKey) -> Result<Vec<ResourceLock>> {
        self.store.active_locks(key, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager(store: Arc<MemoryStore>, attempts: u32) -> LockManager {
        let config = LockConfig {
            max_acquire_attempts: attempts,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
            ..LockConfig::default()
        };
        LockManager::new(store, config, EventPublisher::default())
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let locks = manager(Arc::new(MemoryStore::new()), 1);
        let result = locks
            .acquire(
                &ResourceKey::entity_type("Teams"),
                LockType::Exclusive,
                Uuid::new_v4(),
                Duration::zero(),
            )
            .await;
        assert!(matches!(result, Err(ImportError::Validation(_))));
    }

    #[tokio::test]
    async fn test_sub_second_ttl_keeps_lock_alive() {
        let locks = manager(Arc::new(MemoryStore::new()), 1);
        let key = ResourceKey::entity_type("Teams");
        let outcome = locks
            .acquire(&key, LockType::Exclusive, Uuid::new_v4(), Duration::milliseconds(500))
            .await
            .unwrap();
        let LockOutcome::Granted(lock) = outcome else {
            panic!("expected a grant, got {outcome:?}");
        };
        assert_eq!(lock.expires_at - lock.acquired_at, Duration::milliseconds(500));

        // Still held at the instant it was granted
        assert!(locks.reclaim_expired_at(lock.acquired_at).await.unwrap().is_empty());

        let sub_milli = locks
            .acquire(&key, LockType::Shared, Uuid::new_v4(), Duration::microseconds(500))
            .await;
        assert!(matches!(sub_milli, Err(ImportError::Validation(_))));
    }

    #[tokio::test]
    async fn test_partial_lock_set_released_on_exhaustion() {
        let store = Arc::new(MemoryStore::new());
        let locks = manager(store.clone(), 2);
        let blocker = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let ttl = Duration::minutes(5);

        locks
            .acquire(&ResourceKey::entity_type("Applications"), LockType::Exclusive, blocker, ttl)
            .await
            .unwrap();

        let keys = vec![
            ResourceKey::entity_type("Teams"),
            ResourceKey::entity_type("Applications"),
        ];
        let result = locks.acquire_all(&keys, owner, ttl).await;

        match result {
            Err(ImportError::LockConflict { resource, attempts }) => {
                assert_eq!(resource, "entity-type:Applications");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected lock conflict, got {other:?}"),
        }
        assert!(locks.locks_held_by(owner).await.unwrap().is_empty());
        assert_eq!(locks.locks_held_by(blocker).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_extend_and_release_all() {
        let store = Arc::new(MemoryStore::new());
        let locks = manager(store, 1);
        let owner = Uuid::new_v4();
        let keys = vec![ResourceKey::entity_type("Teams"), ResourceKey::entity_type("Users")];

        let granted = locks.acquire_all(&keys, owner, Duration::seconds(30)).await.unwrap();
        assert_eq!(granted.len(), 2);
        assert_eq!(locks.extend(owner, Duration::minutes(10)).await.unwrap(), 2);
        assert_eq!(locks.release_all(owner).await.unwrap(), 2);
        assert!(locks.active_locks(&keys[0]).await.unwrap().is_empty());
    }
}
