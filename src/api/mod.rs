//! Public API layer: stable entry points for external consumers.

mod handle;
mod runner;

pub use handle::WorkflowHandle;
pub use runner::{WorkflowRunner, WorkflowRunnerBuilder};
