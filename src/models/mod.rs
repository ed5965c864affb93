//! # Data Model
//!
//! Domain records for every persisted table. Records are plain serde structs;
//! the Postgres store maps them to and from its own row types.

pub mod entity_dependency;
pub mod import_batch;
pub mod orchestration;
pub mod orchestration_dependency;
pub mod progress;
pub mod queue_entry;
pub mod resource_lock;
pub mod rollback_action;
pub mod schedule;
pub mod tenant_limit;

pub use entity_dependency::EntityDependency;
pub use import_batch::{ImportBatch, ImportStatistics, NewImportBatch};
pub use orchestration::{ImportPhase, Orchestration, PhaseDetails};
pub use orchestration_dependency::{DependencyType, OrchestrationDependency};
pub use progress::{ProgressStatus, ProgressTrackingEntry};
pub use queue_entry::{CancelOutcome, NewQueueEntry, QueueEntry, QueueStatus, ResourceAmounts};
pub use resource_lock::{LockOutcome, LockRequest, LockType, ResourceKey, ResourceLock};
pub use rollback_action::{RollbackAction, RollbackActionType};
pub use schedule::{
    ExecutionStatus, ReservationStatus, ResourceReservation, ScheduleDefinition,
    ScheduleExecutionHistory, ScheduleStatus, ScheduledImport,
};
pub use tenant_limit::{EnforcementLevel, TenantResourceLimit};
