use thiserror::Error;

use super::error_context::{ErrorCode, ErrorContext};

/// Node-level errors
///
/// Raised inside a node body and converted into a Failed (or Exception)
/// event at the node boundary. They never cross into the dispatcher as
/// faults.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Variable not found: {0}")]
    VariableNotFound(String),
    #[error("Execution error: {0}")]
    ExecutionError(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Condition error: {0}")]
    ConditionError(String),
    #[error("Template error: {0}")]
    TemplateError(String),
    #[error("Output length {length} exceeds the maximum of {limit} characters")]
    OutputTooLong { length: usize, limit: usize },
    #[error("Input validation error: {0}")]
    InputValidationError(String),
    #[error("Timeout: node execution exceeded time limit")]
    Timeout,
    #[error("Node execution was cancelled")]
    Cancelled,
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Sub-graph error: {0}")]
    SubGraphError(String),
    #[error("Human input error: {0}")]
    HumanInputError(String),
    #[error("{source}")]
    WithContext {
        #[source]
        source: Box<NodeError>,
        context: ErrorContext,
    },
}

impl NodeError {
    /// Attach structured context to the error.
    pub fn with_context(self, context: ErrorContext) -> Self {
        match self {
            NodeError::WithContext { source, .. } => NodeError::WithContext { source, context },
            other => NodeError::WithContext {
                source: Box::new(other),
                context,
            },
        }
    }

    pub fn error_context(&self) -> Option<&ErrorContext> {
        match self {
            NodeError::WithContext { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The innermost error, skipping context wrappers.
    pub fn root(&self) -> &NodeError {
        match self {
            NodeError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        if let Some(ctx) = self.error_context() {
            return ctx.code;
        }
        match self {
            NodeError::ConfigError(_) => ErrorCode::ConfigError,
            NodeError::VariableNotFound(_) => ErrorCode::VariableNotFound,
            NodeError::ExecutionError(_) => ErrorCode::ExecutionError,
            NodeError::TypeError(_) => ErrorCode::TypeError,
            NodeError::ConditionError(_) => ErrorCode::ConditionError,
            NodeError::TemplateError(_) => ErrorCode::TemplateError,
            NodeError::OutputTooLong { .. } => ErrorCode::OutputTooLong,
            NodeError::InputValidationError(_) => ErrorCode::InputValidationError,
            NodeError::Timeout => ErrorCode::Timeout,
            NodeError::Cancelled => ErrorCode::Cancelled,
            NodeError::SerializationError(_) => ErrorCode::SerializationError,
            NodeError::SubGraphError(_) => ErrorCode::SubGraphError,
            NodeError::HumanInputError(_) => ErrorCode::HumanInputError,
            NodeError::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Stable snake_case name used in `error_type` fields of events.
    pub fn error_type(&self) -> String {
        self.error_code().as_str().to_string()
    }

    pub fn is_retryable(&self) -> bool {
        if let Some(ctx) = self.error_context() {
            return ctx.retryable;
        }
        matches!(self.root(), NodeError::Timeout | NodeError::ExecutionError(_))
    }

    pub fn to_structured_json(&self) -> serde_json::Value {
        let mut value = serde_json::json!({
            "message": self.to_string(),
            "error_type": self.error_type(),
            "retryable": self.is_retryable(),
        });
        if let (Some(ctx), Some(obj)) = (self.error_context(), value.as_object_mut()) {
            if let Ok(ctx_value) = serde_json::to_value(ctx) {
                obj.insert("context".to_string(), ctx_value);
            }
        }
        value
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::SerializationError(e.to_string())
    }
}
