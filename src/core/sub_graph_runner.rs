//! Sub-graph runner for container nodes (Iteration, Loop).
//!
//! A container owns a nested graph built with validation skipped. The
//! [`SubGraphRunner`] trait abstracts how one pass over that graph is run so
//! that tests can substitute custom implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::dispatcher::{RunOutcome, WorkflowDispatcher};
use crate::core::runtime_context::NodeContext;
use crate::core::runtime_state::{ExecutionIdentity, GraphRuntimeState};
use crate::core::variable_pool::VariablePool;
use crate::domain::execution::Segment;
use crate::domain::model::Selector;
use crate::error::NodeError;
use crate::graph::Graph;

/// Result of one pass over a nested graph.
#[derive(Debug, Clone)]
pub struct SubGraphOutput {
    /// The scoped pool after the pass; holds only the pass's own writes.
    pub pool: VariablePool,
    /// Outputs of End/Answer nodes inside the nested graph.
    pub outputs: HashMap<String, Value>,
    pub total_tokens: i64,
}

impl SubGraphOutput {
    pub fn get(&self, selector: &Selector) -> Option<&Segment> {
        self.pool.get(selector)
    }
}

#[async_trait]
pub trait SubGraphRunner: Send + Sync {
    /// Run `graph` once over a child of `parent_pool` seeded with
    /// `scope_vars`. Writes stay in the child.
    async fn run_sub_graph(
        &self,
        graph: Arc<Graph>,
        parent_pool: Arc<VariablePool>,
        scope_vars: Vec<(Selector, Segment)>,
        ctx: &NodeContext,
    ) -> Result<SubGraphOutput, NodeError>;
}

/// Runs the nested graph on a fresh [`WorkflowDispatcher`] one call level
/// deeper than the container.
#[derive(Debug, Default)]
pub struct DefaultSubGraphRunner;

#[async_trait]
impl SubGraphRunner for DefaultSubGraphRunner {
    async fn run_sub_graph(
        &self,
        graph: Arc<Graph>,
        parent_pool: Arc<VariablePool>,
        scope_vars: Vec<(Selector, Segment)>,
        ctx: &NodeContext,
    ) -> Result<SubGraphOutput, NodeError> {
        let mut pool = VariablePool::new_child(parent_pool);
        for (selector, value) in scope_vars {
            pool.set(&selector, value);
        }

        let context = Arc::new(ctx.runtime.nested());
        let state = GraphRuntimeState::new(
            graph,
            pool,
            ExecutionIdentity::default(),
            context.workflow_execution_id.clone(),
            context.time_provider.now(),
        );
        let mut dispatcher = WorkflowDispatcher::new(state, context);
        let outcome = dispatcher
            .run()
            .await
            .map_err(|e| NodeError::SubGraphError(e.to_string()))?;
        if let RunOutcome::Paused { .. } = outcome {
            return Err(NodeError::SubGraphError(
                "nodes inside a container cannot pause".to_string(),
            ));
        }

        let state = dispatcher.into_state();
        Ok(SubGraphOutput {
            outputs: state.outputs.clone(),
            total_tokens: state.total_tokens(),
            pool: state.variable_pool,
        })
    }
}
