//! # System Constants
//!
//! Operational boundaries and well-known names shared across the queue, lock,
//! orchestration, rollback and scheduling components.

/// Event names published through [`crate::events::EventPublisher`].
pub mod events {
    pub const REQUEST_ENQUEUED: &str = "queue.request_enqueued";
    pub const REQUEST_DEQUEUED: &str = "queue.request_dequeued";
    pub const REQUEST_REQUEUED: &str = "queue.request_requeued";
    pub const REQUEST_FINISHED: &str = "queue.request_finished";
    pub const REQUEST_CANCEL_REQUESTED: &str = "queue.cancel_requested";

    pub const LOCK_GRANTED: &str = "lock.granted";
    pub const LOCK_CONFLICT: &str = "lock.conflict";
    pub const LOCK_RELEASED: &str = "lock.released";
    pub const LOCKS_RECLAIMED: &str = "lock.reclaimed";

    pub const PHASE_STARTED: &str = "orchestration.phase_started";
    pub const PHASE_PROGRESS: &str = "orchestration.phase_progress";
    pub const PHASE_COMPLETED: &str = "orchestration.phase_completed";
    pub const PHASE_FAILED: &str = "orchestration.phase_failed";
    pub const ORCHESTRATION_FINISHED: &str = "orchestration.finished";

    pub const ROLLBACK_ACTION_RECORDED: &str = "rollback.action_recorded";
    pub const ROLLBACK_FINISHED: &str = "rollback.finished";

    pub const SCHEDULE_FIRED: &str = "schedule.fired";
    pub const SCHEDULE_REJECTED: &str = "schedule.rejected";
    pub const SCHEDULE_EXECUTION_FINISHED: &str = "schedule.execution_finished";
}

/// Queue priority bounds (inclusive). Higher values are served first.
pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 20;

/// Default number of concurrently `PROCESSING` queue entries.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Default number of orchestration phases.
pub const DEFAULT_PHASE_COUNT: i32 = 5;

/// Resource type used for per-entity-type import locks, e.g. `entity-type:Teams`.
pub const ENTITY_TYPE_RESOURCE: &str = "entity-type";

/// Import type reserved for the bulk "import everything" flow, which is not supported.
pub const IMPORT_ALL_TYPE: &str = "ALL";

/// Actor recorded on rollback actions triggered by the orchestrator itself.
pub const SYSTEM_ACTOR: &str = "system:orchestrator";

/// Reason recorded when an orchestration stops because its request was cancelled.
pub const CANCELLED_REASON: &str = "cancelled";
