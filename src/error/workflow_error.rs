//! Workflow-level error types.

use super::NodeError;
use thiserror::Error;

/// Workflow-level errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("DSL parse error: {0}")]
    DslParseError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Graph validation error: {0}")]
    GraphValidationError(String),
    #[error("Cycle detected in graph at node: {0}")]
    CycleDetected(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Execution timeout")]
    ExecutionTimeout,
    #[error("Max steps exceeded: {0}")]
    MaxStepsExceeded(i32),
    #[error("Max call depth {max} exceeded (depth {depth})")]
    MaxCallDepthExceeded { depth: u32, max: u32 },
    #[error("Workflow aborted: {0}")]
    Aborted(String),
    #[error("Node execution error: node={node_id}, error={error}")]
    NodeExecutionError {
        node_id: String,
        error: String,
        error_detail: Option<serde_json::Value>,
    },
    #[error("Layer '{layer}' failed to initialize: {message}")]
    LayerInitializationError { layer: String, message: String },
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Pause entity {0} has already been resumed")]
    AlreadyResumed(String),
    #[error("Pause entity not found: {0}")]
    PauseNotFound(String),
    #[error("Pause repository error: {0}")]
    PauseRepositoryError(String),
    #[error("Invalid state transition for runtime node {runtime_node_id}: {from} -> {to}")]
    InvalidStateTransition {
        runtime_node_id: String,
        from: String,
        to: String,
    },
    #[error("Node error: {0}")]
    NodeError(Box<NodeError>),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<NodeError> for WorkflowError {
    fn from(value: NodeError) -> Self {
        WorkflowError::NodeError(Box::new(value))
    }
}

impl WorkflowError {
    /// Short status name reported with terminal events.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Aborted(_) => "aborted",
            WorkflowError::ExecutionTimeout => "timeout",
            WorkflowError::MaxStepsExceeded(_) => "max_steps_exceeded",
            WorkflowError::LayerInitializationError { .. } => "layer_initialization",
            WorkflowError::SerializationError(_) => "serialization",
            WorkflowError::NodeExecutionError { .. } => "node_execution",
            _ => "failed",
        }
    }
}
