use serde::{Deserialize, Serialize};

/// Stable classification of a node failure, reported as `error_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ConfigError,
    VariableNotFound,
    ExecutionError,
    TypeError,
    ConditionError,
    TemplateError,
    OutputTooLong,
    InputValidationError,
    Timeout,
    Cancelled,
    SerializationError,
    SubGraphError,
    HumanInputError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigError => "config_error",
            ErrorCode::VariableNotFound => "variable_not_found",
            ErrorCode::ExecutionError => "execution_error",
            ErrorCode::TypeError => "type_error",
            ErrorCode::ConditionError => "condition_error",
            ErrorCode::TemplateError => "template_error",
            ErrorCode::OutputTooLong => "output_too_long",
            ErrorCode::InputValidationError => "input_validation_error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::SerializationError => "serialization_error",
            ErrorCode::SubGraphError => "sub_graph_error",
            ErrorCode::HumanInputError => "human_input_error",
        }
    }
}

/// Overrides attached to a [`NodeError`](super::NodeError): the reported
/// code, whether the retry policy may re-run the node, an optional delay
/// before the next attempt and free-form diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub code: ErrorCode,
    pub retryable: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ErrorContext {
    pub fn non_retryable(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            retryable: false,
            message: message.into(),
            retry_after_secs: None,
            metadata: None,
        }
    }

    pub fn retryable(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::non_retryable(code, message)
        }
    }

    /// Wait `secs` before the next attempt instead of the configured interval.
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
