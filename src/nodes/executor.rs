use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::runtime_context::NodeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::schema::{NodeRunResult, NodeType};
use crate::error::NodeError;
use crate::graph::NodeConfig;

/// Trait for node execution. Each node type implements this.
///
/// The executor sees a read-only snapshot of the pool and returns one
/// result; the worker wrapper turns it into the node's terminal event.
/// Intermediate output goes through [`NodeContext::emit_chunk`].
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(
        &self,
        node_id: &str,
        config: &NodeConfig,
        variable_pool: &VariablePool,
        context: &NodeContext,
    ) -> Result<NodeRunResult, NodeError>;
}

/// Registry of node executors by node type.
pub struct NodeExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl NodeExecutorRegistry {
    /// A registry with every built-in executor enabled by crate features.
    ///
    /// `code` has no built-in executor; hosts register their own.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        #[cfg(feature = "builtin-core-nodes")]
        {
            use super::control_flow::{
                AnswerNodeExecutor, EndNodeExecutor, IfElseNodeExecutor, StartNodeExecutor,
            };
            registry.register(NodeType::Start, Arc::new(StartNodeExecutor));
            registry.register(NodeType::EventSource, Arc::new(StartNodeExecutor));
            registry.register(NodeType::End, Arc::new(EndNodeExecutor));
            registry.register(NodeType::Answer, Arc::new(AnswerNodeExecutor::new()));
            registry.register(NodeType::IfElse, Arc::new(IfElseNodeExecutor));
            registry.register(
                NodeType::HumanInput,
                Arc::new(super::human_input::HumanInputExecutor),
            );
        }

        #[cfg(feature = "builtin-transform-nodes")]
        registry.register(
            NodeType::TemplateTransform,
            Arc::new(super::data_transform::TemplateTransformExecutor::new()),
        );

        #[cfg(feature = "builtin-subgraph-nodes")]
        {
            use super::flow::{ContainerStartExecutor, IterationNodeExecutor, LoopNodeExecutor};
            registry.register(NodeType::Iteration, Arc::new(IterationNodeExecutor));
            registry.register(NodeType::IterationStart, Arc::new(ContainerStartExecutor));
            registry.register(NodeType::Loop, Arc::new(LoopNodeExecutor));
            registry.register(NodeType::LoopStart, Arc::new(ContainerStartExecutor));
        }

        registry
    }

    pub fn empty() -> Self {
        NodeExecutorRegistry {
            executors: HashMap::new(),
        }
    }

    /// Register (or replace) the executor for `node_type`.
    pub fn register(&mut self, node_type: NodeType, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(node_type, executor);
    }

    pub fn with(mut self, node_type: NodeType, executor: Arc<dyn NodeExecutor>) -> Self {
        self.register(node_type, executor);
        self
    }

    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&node_type).cloned()
    }

    pub fn contains(&self, node_type: NodeType) -> bool {
        self.executors.contains_key(&node_type)
    }

    pub fn registered_types(&self) -> Vec<NodeType> {
        let mut types: Vec<NodeType> = self.executors.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

impl Default for NodeExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
