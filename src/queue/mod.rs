//! # Queue Manager
//!
//! Persistent priority queue of import requests. Enqueue always succeeds
//! (subject to tenant ceilings); the concurrency bound is applied at dequeue.

pub mod governor;
pub mod manager;

pub use governor::TenantGovernor;
pub use manager::QueueManager;
