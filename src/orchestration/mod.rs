//! # Orchestration
//!
//! The phase state machine that drives one queued import through
//! validate, acquire locks, stage, promote and finalize, plus the intake
//! path that creates its records and the worker runtime that runs it.

pub mod backoff;
pub mod intake;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use intake::{ImportIntake, ImportSubmission, Prerequisite, SubmissionReceipt};
pub use orchestrator::{ImportOrchestrator, RunOutcome};
pub use plan::ImportPlan;
pub use progress::{overall_percentage, ProgressReporter, PHASE_STEP};
pub use worker::{ImportWorker, WorkerPool};
