#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Import Orchestrator
//!
//! Orchestration core for bulk entity imports that must be resumable,
//! lock-safe and reversible.
//!
//! ## Overview
//!
//! Import requests enter a priority queue with per-tenant admission limits.
//! Workers dequeue them, take advisory locks on the entity types they write,
//! and drive each request through a fixed phase sequence:
//!
//! ```text
//! validate -> acquire_locks -> stage -> promote -> finalize
//! ```
//!
//! Every transition is persisted before the next phase starts, so a run
//! abandoned by a crashed worker is picked up where it stopped. A run that
//! fails after promoting rows is compensated entity by entity in reverse
//! dependency order, and every compensating action is recorded. Recurring
//! imports are driven by cron schedules with resource reservations.
//!
//! ## Module Organization
//!
//! - [`queue`] - Priority admission queue and tenant governor
//! - [`locks`] - Advisory resource locks with TTL and reclamation
//! - [`dependency`] - Entity import ordering
//! - [`orchestration`] - Intake, phased orchestrator, progress and workers
//! - [`rollback`] - Compensating rollback engine
//! - [`scheduler`] - Cron schedules, reservations and execution history
//! - [`state_machine`] - Orchestration and batch lifecycles
//! - [`store`] - Persistence traits plus Postgres and in-memory stores
//! - [`collaborators`] - Parser and staging-area seams
//! - [`service`] - Caller-facing facade
//! - [`config`] / [`error`] / [`logging`] / [`events`] - Ambient plumbing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use import_orchestrator::collaborators::{DelimitedParser, InMemoryStagingArea};
//! use import_orchestrator::config::ConfigManager;
//! use import_orchestrator::service::ImportService;
//! use import_orchestrator::store::PgStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! import_orchestrator::logging::init_structured_logging();
//! let manager = ConfigManager::load()?;
//! let store = Arc::new(PgStore::connect(&manager.config().database).await?);
//!
//! let service = ImportService::from_store(
//!     store,
//!     Arc::new(DelimitedParser::new()),
//!     Arc::new(InMemoryStagingArea::new()),
//!     manager.config().clone(),
//! )
//! .await?;
//! let pool = service.start_workers(manager.config().queue.max_concurrent);
//! # pool.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                                  # Unit and in-memory integration tests
//! cargo test --features test-database         # Postgres tests (needs DATABASE_URL)
//! ```

#[macro_use]
pub mod macros;

pub mod collaborators;
pub mod config;
pub mod constants;
pub mod dependency;
pub mod error;
pub mod events;
pub mod locks;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod queue;
pub mod rollback;
pub mod scheduler;
pub mod service;
pub mod state_machine;
pub mod store;

pub use config::{ConfigManager, ImportConfig};
pub use error::{FailureKind, ImportError, Result};
pub use events::{EventPublisher, ImportEvent};
pub use orchestration::{ImportSubmission, RunOutcome, SubmissionReceipt};
pub use service::{ImportService, ImportStatusReport};
pub use state_machine::{BatchStatus, OrchestrationStatus};
