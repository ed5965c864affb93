//! # Rollback / Compensation Engine
//!
//! Best-effort compensation of promoted entity types in reverse dependency
//! order. Every attempt is recorded as a [`RollbackAction`](crate::models::RollbackAction),
//! successful or not.

pub mod engine;

pub use engine::{RollbackEngine, RollbackReport};
