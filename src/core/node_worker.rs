//! Runs one node invocation on a worker task.
//!
//! The worker applies the node's timeout, retry policy and error strategy,
//! catches panics, and then sends exactly one terminal event into the
//! dispatcher's queue. It never touches run state directly.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{debug, warn};

use crate::core::event_bus::{EventEmitter, GraphEngineEvent};
use crate::core::runtime_context::NodeContext;
use crate::core::variable_pool::VariablePool;
use crate::domain::execution::{Segment, WorkflowNodeExecutionStatus};
use crate::domain::model::PauseType;
use crate::dsl::schema::{
    BackoffStrategy, ErrorStrategyType, NodeRunResult, RetryConfig, DEFAULT_SOURCE_HANDLE,
    FAIL_BRANCH_HANDLE,
};
use crate::error::{ErrorCode, ErrorContext, NodeError};
use crate::graph::GraphNode;

/// Execute `node` against a pool snapshot and report the terminal event.
pub(crate) async fn run_node(
    node: GraphNode,
    pool: VariablePool,
    ctx: NodeContext,
    start_at: DateTime<Utc>,
    emitter: EventEmitter,
) {
    let outcome = AssertUnwindSafe(execute_node_with_retry(&node, &pool, &ctx, start_at, &emitter))
        .catch_unwind()
        .await;

    let event = match outcome {
        Ok(Ok(result)) => terminal_event(&node, &ctx, start_at, result),
        Ok(Err(e)) => {
            debug!(node_id = %node.id, error = %e, "node failed");
            let result = NodeRunResult {
                status: WorkflowNodeExecutionStatus::Failed,
                error: Some(e.to_string()),
                error_type: Some(e.error_type()),
                error_detail: Some(e.to_structured_json()),
                ..Default::default()
            };
            failed_event(&node, &ctx, start_at, e.to_string(), result)
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(node_id = %node.id, panic = %message, "node panicked");
            let error = format!("node panicked: {}", message);
            let result = NodeRunResult {
                status: WorkflowNodeExecutionStatus::Failed,
                error: Some(error.clone()),
                error_type: Some("internal_error".to_string()),
                ..Default::default()
            };
            failed_event(&node, &ctx, start_at, error, result)
        }
    };

    if !emitter.emit(event) {
        debug!(node_id = %node.id, "dispatcher gone, terminal event dropped");
    }
}

fn terminal_event(
    node: &GraphNode,
    ctx: &NodeContext,
    start_at: DateTime<Utc>,
    result: NodeRunResult,
) -> GraphEngineEvent {
    match result.status {
        WorkflowNodeExecutionStatus::Paused => GraphEngineEvent::NodeRunPaused {
            id: ctx.runtime_node_id.clone(),
            node_id: node.id.clone(),
            node_type: node.node_type,
            node_title: node.title.clone(),
            start_at,
            pause_type: result
                .pause_type
                .clone()
                .unwrap_or(PauseType::SchedulingPause {}),
            node_run_result: result,
        },
        WorkflowNodeExecutionStatus::Exception => GraphEngineEvent::NodeRunException {
            id: ctx.runtime_node_id.clone(),
            node_id: node.id.clone(),
            node_type: node.node_type,
            node_title: node.title.clone(),
            start_at,
            error: result.error.clone().unwrap_or_default(),
            node_run_result: result,
        },
        WorkflowNodeExecutionStatus::Failed => {
            let error = result.error.clone().unwrap_or_default();
            failed_event(node, ctx, start_at, error, result)
        }
        _ => GraphEngineEvent::NodeRunSucceeded {
            id: ctx.runtime_node_id.clone(),
            node_id: node.id.clone(),
            node_type: node.node_type,
            node_title: node.title.clone(),
            start_at,
            node_run_result: NodeRunResult {
                status: WorkflowNodeExecutionStatus::Succeeded,
                ..result
            },
        },
    }
}

fn failed_event(
    node: &GraphNode,
    ctx: &NodeContext,
    start_at: DateTime<Utc>,
    error: String,
    result: NodeRunResult,
) -> GraphEngineEvent {
    GraphEngineEvent::NodeRunFailed {
        id: ctx.runtime_node_id.clone(),
        node_id: node.id.clone(),
        node_type: node.node_type,
        node_title: node.title.clone(),
        start_at,
        error,
        node_run_result: result,
    }
}

async fn execute_node_with_retry(
    node: &GraphNode,
    pool: &VariablePool,
    ctx: &NodeContext,
    start_at: DateTime<Utc>,
    emitter: &EventEmitter,
) -> Result<NodeRunResult, NodeError> {
    let executor = ctx.runtime.registry.get(node.node_type).ok_or_else(|| {
        NodeError::ConfigError(format!("No executor for node type: {}", node.node_type))
    })?;

    let retry_config = node.retry_config.as_ref();
    let max_retries = retry_config.map(|rc| rc.max_retries).unwrap_or(0).max(0);
    let retry_on_retryable_only = retry_config
        .map(|rc| rc.retry_on_retryable_only)
        .unwrap_or(true);

    let mut last_error: Option<NodeError> = None;
    let mut attempts = 0;

    for attempt in 0..=max_retries {
        attempts = attempt;
        let exec_future = executor.execute(&node.id, &node.config, pool, ctx);
        let exec_result = match node.timeout_secs {
            Some(timeout_secs) => {
                match tokio::time::timeout(Duration::from_secs(timeout_secs), exec_future).await {
                    Ok(r) => r,
                    Err(_) => Err(NodeError::Timeout.with_context(ErrorContext::retryable(
                        ErrorCode::Timeout,
                        format!("Node execution timed out after {}s", timeout_secs),
                    ))),
                }
            }
            None => exec_future.await,
        };

        match exec_result {
            Ok(mut result) => {
                result.retry_index = attempt;
                return Ok(result);
            }
            Err(e) => {
                let should_retry = attempt < max_retries
                    && !ctx.is_cancelled()
                    && (!retry_on_retryable_only || e.is_retryable());
                if !should_retry {
                    last_error = Some(e);
                    break;
                }

                let interval = calculate_retry_interval(retry_config, attempt, &e);
                emitter.emit(GraphEngineEvent::NodeRunRetry {
                    id: ctx.runtime_node_id.clone(),
                    node_id: node.id.clone(),
                    node_type: node.node_type,
                    node_title: node.title.clone(),
                    start_at,
                    error: e.to_string(),
                    retry_index: attempt + 1,
                });
                debug!(node_id = %node.id, retry = attempt + 1, interval_ms = interval, "retrying node");
                if interval > 0 {
                    tokio::time::sleep(Duration::from_millis(interval)).await;
                }
                last_error = Some(e);
            }
        }
    }

    let last_err =
        last_error.unwrap_or_else(|| NodeError::ExecutionError("Unknown error".to_string()));
    apply_error_strategy(node, last_err, attempts)
}

/// Map a final node error through the node's error strategy.
fn apply_error_strategy(
    node: &GraphNode,
    error: NodeError,
    retry_index: i32,
) -> Result<NodeRunResult, NodeError> {
    let handle = match node.error_strategy_type() {
        ErrorStrategyType::None => return Err(error),
        ErrorStrategyType::FailBranch => FAIL_BRANCH_HANDLE,
        ErrorStrategyType::DefaultValue => DEFAULT_SOURCE_HANDLE,
    };

    let mut outputs: HashMap<String, Segment> = HashMap::new();
    if node.error_strategy_type() == ErrorStrategyType::DefaultValue {
        if let Some(strategy) = &node.error_strategy {
            for (k, v) in &strategy.default_value {
                outputs.insert(k.clone(), Segment::from_value(v));
            }
        }
    }
    outputs.insert("error_message".to_string(), Segment::String(error.to_string()));
    outputs.insert("error_type".to_string(), Segment::String(error.error_type()));

    Ok(NodeRunResult {
        status: WorkflowNodeExecutionStatus::Exception,
        outputs,
        edge_source_handle: handle.to_string(),
        error: Some(error.to_string()),
        error_type: Some(error.error_type()),
        error_detail: Some(error.to_structured_json()),
        retry_index,
        ..Default::default()
    })
}

/// Milliseconds to wait before retry `attempt + 1`.
pub(crate) fn calculate_retry_interval(
    retry_config: Option<&RetryConfig>,
    attempt: i32,
    error: &NodeError,
) -> u64 {
    let rc = match retry_config {
        Some(rc) => rc,
        None => return 0,
    };

    if let Some(ctx) = error.error_context() {
        if let Some(retry_after) = ctx.retry_after_secs {
            return retry_after * 1000;
        }
    }

    let base = rc.retry_interval.max(0) as u64;
    let interval = match rc.backoff_strategy {
        BackoffStrategy::Fixed => base,
        BackoffStrategy::Exponential => (base as f64 * rc.backoff_multiplier.powi(attempt)) as u64,
        BackoffStrategy::ExponentialWithJitter => {
            let multiplied = base as f64 * rc.backoff_multiplier.powi(attempt);
            let jitter = rand::random::<f64>() * multiplied * 0.1;
            (multiplied + jitter) as u64
        }
    };

    interval.min(rc.max_retry_interval.max(0) as u64)
}
