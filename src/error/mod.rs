//! Error types for the workflow engine.
//!
//! [`NodeError`] is what a node body returns; the worker maps it through
//! retries and error strategies. [`WorkflowError`] covers everything at run
//! level: parsing, graph building, running and resuming.

pub mod error_context;
pub mod node_error;
pub mod workflow_error;

pub use error_context::{ErrorCode, ErrorContext};
pub use node_error::NodeError;
pub use workflow_error::WorkflowError;

pub type WorkflowResult<T> = Result<T, WorkflowError>;
