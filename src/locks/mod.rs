//! # Resource Lock Manager
//!
//! Advisory, store-mediated locks on `(resource_type, resource_id)` keys.
//! Expiry is the failure-recovery mechanism: a crashed holder's lock becomes
//! reclaimable once its TTL passes.
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::Duration;
//! use uuid::Uuid;
//! use import_orchestrator::config::LockConfig;
//! use import_orchestrator::events::EventPublisher;
//! use import_orchestrator::locks::LockManager;
//! use import_orchestrator::models::{LockType, ResourceKey};
//! use import_orchestrator::store::MemoryStore;
//!
//! # tokio_test::block_on(async {
//! let locks = LockManager::new(
//!     Arc::new(MemoryStore::new()),
//!     LockConfig::default(),
//!     EventPublisher::default(),
//! );
//! let key = ResourceKey::entity_type("Teams");
//! let owner = Uuid::new_v4();
//!
//! let outcome = locks
//!     .acquire(&key, LockType::Exclusive, owner, Duration::minutes(5))
//!     .await
//!     .unwrap();
//! assert!(outcome.is_granted());
//! assert_eq!(locks.release_all(owner).await.unwrap(), 1);
//! # });
//! ```

pub mod manager;

pub use manager::LockManager;
