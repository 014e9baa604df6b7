//! Iteration Node executor.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::core::runtime_context::NodeContext;
use crate::core::sub_graph_runner::{SubGraphOutput, SubGraphRunner};
use crate::core::variable_pool::VariablePool;
use crate::domain::execution::Segment;
use crate::domain::model::{IterationErrorMode, Selector};
use crate::dsl::schema::{NodeRunResult, NodeType};
use crate::error::NodeError;
use crate::graph::{IterationNodeConfig, NodeConfig};
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::config_mismatch;

use super::{resolve_sub_graph_runner, usage};

const DEFAULT_PARALLELISM: u32 = 10;

/// Runs the body once per element of `iterator_selector`.
///
/// Each pass sees `(node_id, "item")` and `(node_id, "index")`; the value at
/// `output_selector` after the pass is collected into `output`.
pub struct IterationNodeExecutor;

impl IterationNodeExecutor {
    fn resolve_parallelism(config: &IterationNodeConfig) -> usize {
        config.data.parallel_nums.unwrap_or(DEFAULT_PARALLELISM).max(1) as usize
    }
}

/// Per-pass result; `None` marks a pass dropped by `remove-abnormal-output`.
type PassResult = Option<Segment>;

#[async_trait]
impl NodeExecutor for IterationNodeExecutor {
    async fn execute(
        &self,
        node_id: &str,
        config: &NodeConfig,
        variable_pool: &VariablePool,
        context: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let NodeConfig::Iteration(config) = config else {
            return Err(config_mismatch(node_id, NodeType::Iteration, config));
        };

        let selector = &config.data.iterator_selector;
        let input = variable_pool
            .get(selector)
            .ok_or_else(|| NodeError::VariableNotFound(selector.to_string()))?;
        let items = input.array_items().ok_or_else(|| {
            NodeError::TypeError(format!(
                "iteration input {} must be an array, got {}",
                selector,
                input.type_name()
            ))
        })?;

        let parent = Arc::new(variable_pool.clone());
        let parallel = config.data.is_parallel && context.runtime.config.parallel_enabled;
        let (results, total_tokens) = if parallel {
            execute_parallel(node_id, config, items, parent, context).await?
        } else {
            execute_sequential(node_id, config, items, parent, context).await?
        };

        let values: Vec<Value> = results.iter().flatten().map(Segment::to_value).collect();
        let mut outputs = HashMap::new();
        outputs.insert("output".to_string(), Segment::from_value(&Value::Array(values)));

        let mut metadata = HashMap::new();
        metadata.insert("iteration_count".to_string(), json!(results.len()));

        Ok(NodeRunResult {
            outputs,
            metadata,
            llm_usage: usage(total_tokens),
            ..Default::default()
        })
    }
}

fn scope_vars(node_id: &str, index: usize, item: Segment) -> Vec<(Selector, Segment)> {
    vec![
        (Selector::new(node_id, "item"), item),
        (Selector::new(node_id, "index"), Segment::Integer(index as i64)),
    ]
}

/// Apply the error mode to one pass.
fn settle(
    config: &IterationNodeConfig,
    index: usize,
    result: Result<SubGraphOutput, NodeError>,
) -> Result<(PassResult, i64), NodeError> {
    match result {
        Ok(output) => {
            let value = output
                .get(&config.data.output_selector)
                .cloned()
                .unwrap_or(Segment::None);
            Ok((Some(value), output.total_tokens))
        }
        Err(e) => match config.data.error_handle_mode {
            IterationErrorMode::Terminated => Err(NodeError::SubGraphError(format!(
                "iteration {} failed: {}",
                index, e
            ))),
            IterationErrorMode::RemoveAbnormalOutput => {
                debug!(index, error = %e, "dropping failed iteration");
                Ok((None, 0))
            }
            IterationErrorMode::ContinueOnError => Ok((Some(Segment::None), 0)),
        },
    }
}

async fn execute_sequential(
    node_id: &str,
    config: &IterationNodeConfig,
    items: Vec<Segment>,
    parent: Arc<VariablePool>,
    context: &NodeContext,
) -> Result<(Vec<PassResult>, i64), NodeError> {
    let runner = resolve_sub_graph_runner(&context.runtime);
    let mut results = Vec::with_capacity(items.len());
    let mut total_tokens = 0;

    for (index, item) in items.into_iter().enumerate() {
        if context.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        let result = runner
            .run_sub_graph(
                config.graph.clone(),
                parent.clone(),
                scope_vars(node_id, index, item),
                context,
            )
            .await;
        let (value, tokens) = settle(config, index, result)?;
        total_tokens += tokens;
        results.push(value);
    }

    Ok((results, total_tokens))
}

async fn execute_parallel(
    node_id: &str,
    config: &IterationNodeConfig,
    items: Vec<Segment>,
    parent: Arc<VariablePool>,
    context: &NodeContext,
) -> Result<(Vec<PassResult>, i64), NodeError> {
    let semaphore = Arc::new(Semaphore::new(IterationNodeExecutor::resolve_parallelism(config)));
    let runner: Arc<dyn SubGraphRunner> = resolve_sub_graph_runner(&context.runtime);
    let mut tasks = JoinSet::new();

    for (index, item) in items.iter().cloned().enumerate() {
        let semaphore = semaphore.clone();
        let runner = runner.clone();
        let graph = config.graph.clone();
        let parent = parent.clone();
        let context = context.clone();
        let scope = scope_vars(node_id, index, item);

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| NodeError::ExecutionError(e.to_string()))?;
            if context.is_cancelled() {
                return Err(NodeError::Cancelled);
            }
            Ok((index, runner.run_sub_graph(graph, parent, scope, &context).await))
        });
    }

    let mut results: Vec<PassResult> = vec![None; items.len()];
    let mut total_tokens = 0;
    while let Some(joined) = tasks.join_next().await {
        let settled = joined
            .map_err(|e| NodeError::ExecutionError(e.to_string()))
            .and_then(|pass| pass)
            .and_then(|(index, result)| Ok((index, settle(config, index, result)?)));
        match settled {
            Ok((index, (value, tokens))) => {
                total_tokens += tokens;
                results[index] = value;
            }
            Err(e) => {
                // Remaining passes, and the nested workers they own, are gone
                // before the container reports its failure.
                tasks.shutdown().await;
                return Err(e);
            }
        }
    }

    Ok((results, total_tokens))
}
