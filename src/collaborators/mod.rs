//! # External Collaborators
//!
//! Contracts the orchestrator consumes but does not own: parsing and row
//! validation of uploaded payloads, and the staging/master storage that rows
//! are written to and promoted into.

pub mod parser;
pub mod staging;

pub use parser::{DelimitedParser, ImportParser, RawInput, Row, RowError};
pub use staging::{CompensationOutcome, InMemoryStagingArea, StagingArea};
