//! # Observability Events
//!
//! Typed lifecycle events fanned out over a tokio broadcast channel. Nothing in
//! the engine depends on a subscriber being present.

pub mod publisher;

pub use publisher::{EventPublisher, ImportEvent, PublishedEvent};
