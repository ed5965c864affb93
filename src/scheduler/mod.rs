//! # Scheduler
//!
//! Recurring and deferred imports. Each firing pre-reserves tenant resources
//! for its expected duration window, submits an import and records an
//! execution history row; the worker reports the terminal outcome back.

pub mod cron_schedule;
pub mod scheduler;

pub use cron_schedule::ScheduleExpression;
pub use scheduler::{FireOutcome, ImportSubmitter, Scheduler};
