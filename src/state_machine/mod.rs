// State machines for orchestration and batch lifecycles.
//
// Transitions are decided by pure functions here and persisted through the
// store with a compare-and-set on the previous status, so two workers racing
// on the same orchestration cannot both win.

pub mod errors;
pub mod events;
pub mod orchestration_state_machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::OrchestrationEvent;
pub use orchestration_state_machine::{determine_target_state, OrchestrationStateMachine};
pub use states::{BatchStatus, OrchestrationStatus};
