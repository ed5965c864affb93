use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::constants::ENTITY_TYPE_RESOURCE;

crate::status_enum! {
    pub enum LockType {
        Exclusive => "EXCLUSIVE",
        Shared => "SHARED",
    }
}

impl LockType {
    /// Two lock types may coexist on one key only if both are shared
    pub fn compatible_with(&self, other: LockType) -> bool {
        matches!((self, other), (Self::Shared, Self::Shared))
    }
}

/// `(resource_type, resource_id)` pair, rendered as `type:id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_type: String,
    pub resource_id: String,
}

impl ResourceKey {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    /// Lock key guarding one entity type, e.g. `entity-type:Teams`
    pub fn entity_type(entity_type: impl Into<String>) -> Self {
        Self::new(ENTITY_TYPE_RESOURCE, entity_type)
    }

    pub fn parse(key: &str) -> Option<Self> {
        key.split_once(':')
            .map(|(resource_type, resource_id)| Self::new(resource_type, resource_id))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.resource_id)
    }
}

/// A granted advisory lock row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLock {
    pub lock_id: Uuid,
    pub resource_type: String,
    pub resource_id: String,
    pub lock_type: LockType,
    pub owner_request_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    /// Strictly after `acquired_at`
    pub expires_at: DateTime<Utc>,
}

impl ResourceLock {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type.clone(), self.resource_id.clone())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether this unexpired lock blocks `request`
    pub fn blocks(&self, request: &LockRequest) -> bool {
        self.owner_request_id != request.owner_request_id
            && !self.lock_type.compatible_with(request.lock_type)
    }
}

/// Input to an acquire attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRequest {
    pub key: ResourceKey,
    pub lock_type: LockType,
    pub owner_request_id: Uuid,
    /// Millisecond precision so sub-second TTLs survive
    pub ttl_ms: i64,
}

impl LockRequest {
    pub fn exclusive(key: ResourceKey, owner_request_id: Uuid, ttl: Duration) -> Self {
        Self {
            key,
            lock_type: LockType::Exclusive,
            owner_request_id,
            ttl_ms: ttl.num_milliseconds(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::milliseconds(self.ttl_ms)
    }

    /// Build the lock row this request would insert at `now`
    pub fn to_lock(&self, now: DateTime<Utc>) -> ResourceLock {
        ResourceLock {
            lock_id: Uuid::new_v4(),
            resource_type: self.key.resource_type.clone(),
            resource_id: self.key.resource_id.clone(),
            lock_type: self.lock_type,
            owner_request_id: self.owner_request_id,
            acquired_at: now,
            expires_at: now + self.ttl(),
        }
    }
}

/// Result of a single acquire attempt
#[derive(Debug, Clone, PartialEq)]
pub enum LockOutcome {
    Granted(ResourceLock),
    Conflict { holders: Vec<ResourceLock> },
}

impl LockOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_key_rendering() {
        let key = ResourceKey::entity_type("Teams");
        assert_eq!(key.to_string(), "entity-type:Teams");
        assert_eq!(ResourceKey::parse("entity-type:Teams"), Some(key));
        assert_eq!(ResourceKey::parse("no-separator"), None);
    }

    #[test]
    fn test_lock_compatibility_matrix() {
        assert!(LockType::Shared.compatible_with(LockType::Shared));
        assert!(!LockType::Shared.compatible_with(LockType::Exclusive));
        assert!(!LockType::Exclusive.compatible_with(LockType::Shared));
        assert!(!LockType::Exclusive.compatible_with(LockType::Exclusive));
    }

    #[test]
    fn test_blocks_ignores_same_owner() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let request = LockRequest::exclusive(ResourceKey::entity_type("Teams"), owner, Duration::seconds(60));
        let held = request.to_lock(now);

        assert!(!held.blocks(&request));
        let other = LockRequest::exclusive(ResourceKey::entity_type("Teams"), Uuid::new_v4(), Duration::seconds(60));
        assert!(held.blocks(&other));
        assert!(held.expires_at > held.acquired_at);
        assert!(held.is_expired(now + Duration::seconds(60)));
    }
}
