pub mod coordinator;
pub mod engine;

pub use coordinator::{CoordinatorSettings, WorkflowCoordinator};
pub use engine::TransitionOutcome;
