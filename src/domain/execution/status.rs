//! Execution status: the canonical run, node and runtime-node states.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::model::PauseDetail;

/// Status of a workflow run as observed through a handle.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStatus {
    Running,
    Completed(HashMap<String, Value>),
    PartialSucceeded {
        outputs: HashMap<String, Value>,
        exceptions_count: u32,
    },
    Failed(String),
    Aborted(String),
    Paused {
        pause_id: String,
        details: Vec<PauseDetail>,
    },
}

impl ExecutionStatus {
    /// Everything except `Running` ends the current dispatcher loop.
    pub fn is_finished(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

/// Outcome recorded on a single node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowNodeExecutionStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Failed, but recovered by the node's error strategy.
    Exception,
    Paused,
    Retry,
}

impl WorkflowNodeExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowNodeExecutionStatus::Pending => "pending",
            WorkflowNodeExecutionStatus::Running => "running",
            WorkflowNodeExecutionStatus::Succeeded => "succeeded",
            WorkflowNodeExecutionStatus::Failed => "failed",
            WorkflowNodeExecutionStatus::Exception => "exception",
            WorkflowNodeExecutionStatus::Paused => "paused",
            WorkflowNodeExecutionStatus::Retry => "retry",
        }
    }
}

/// Lifecycle of a single runtime node (one execution instance of a graph node).
///
/// Transitions are monotonic: `Pending -> Running -> {Success, Failed, Paused}`.
/// A paused runtime node is never reactivated; resumption creates a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeNodeStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Paused,
}

impl RuntimeNodeStatus {
    pub fn can_transition_to(&self, next: RuntimeNodeStatus) -> bool {
        use RuntimeNodeStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Running, Success) | (Running, Failed) | (Running, Paused)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RuntimeNodeStatus::Success | RuntimeNodeStatus::Failed | RuntimeNodeStatus::Paused
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeNodeStatus::Pending => "pending",
            RuntimeNodeStatus::Running => "running",
            RuntimeNodeStatus::Success => "success",
            RuntimeNodeStatus::Failed => "failed",
            RuntimeNodeStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for RuntimeNodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
