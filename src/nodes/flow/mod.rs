//! Container node executors: Iteration and Loop.
//!
//! These nodes contain embedded sub-graphs that are executed via
//! [`SubGraphRunner`](crate::core::SubGraphRunner), one nested run per pass.

pub mod iteration;
pub mod loop_node;

pub use iteration::IterationNodeExecutor;
pub use loop_node::LoopNodeExecutor;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::runtime_context::{NodeContext, RuntimeContext};
use crate::core::sub_graph_runner::{DefaultSubGraphRunner, SubGraphRunner};
use crate::core::variable_pool::VariablePool;
use crate::dsl::schema::{LlmUsage, NodeRunResult};
use crate::error::NodeError;
use crate::graph::NodeConfig;
use crate::nodes::executor::NodeExecutor;

pub(crate) fn resolve_sub_graph_runner(context: &RuntimeContext) -> Arc<dyn SubGraphRunner> {
    context
        .sub_graph_runner
        .clone()
        .unwrap_or_else(|| Arc::new(DefaultSubGraphRunner))
}

pub(crate) fn usage(total_tokens: i64) -> Option<LlmUsage> {
    (total_tokens > 0).then(|| LlmUsage {
        total_tokens,
        ..Default::default()
    })
}

/// Entry node of a container body (`iteration-start`, `loop-start`).
pub struct ContainerStartExecutor;

#[async_trait]
impl NodeExecutor for ContainerStartExecutor {
    async fn execute(
        &self,
        _node_id: &str,
        _config: &NodeConfig,
        _variable_pool: &VariablePool,
        _context: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        Ok(NodeRunResult::default())
    }
}
