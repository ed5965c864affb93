use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Concurrent modification of {entity} {id}: expected status {expected}")]
    ConcurrentModification {
        entity: &'static str,
        id: String,
        expected: String,
    },

    #[error("Invalid status value in store: {0}")]
    InvalidStatus(String),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
