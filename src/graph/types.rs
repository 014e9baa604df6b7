use std::collections::HashMap;

use crate::dsl::schema::{
    ErrorStrategyConfig, ErrorStrategyType, NodeType, RetryConfig, DEFAULT_SOURCE_HANDLE,
    FAIL_BRANCH_HANDLE,
};

use super::node_config::NodeConfig;

/// A node of the built graph, with its config already decoded.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub node_type: NodeType,
    pub title: String,
    pub config: NodeConfig,
    pub error_strategy: Option<ErrorStrategyConfig>,
    pub retry_config: Option<RetryConfig>,
    pub timeout_secs: Option<u64>,
}

impl GraphNode {
    pub fn error_strategy_type(&self) -> ErrorStrategyType {
        self.error_strategy
            .as_ref()
            .map(|s| s.strategy_type)
            .unwrap_or(ErrorStrategyType::None)
    }

    /// Branch nodes only take the edges whose handle they select.
    pub fn is_branch(&self) -> bool {
        matches!(self.node_type, NodeType::IfElse | NodeType::HumanInput)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub source_handle: String,
}

impl GraphEdge {
    /// Whether this edge is taken when its source finished with `handle`.
    ///
    /// The default handle takes every edge except the error branch.
    pub fn matches_handle(&self, handle: &str) -> bool {
        if handle == DEFAULT_SOURCE_HANDLE {
            self.source_handle != FAIL_BRANCH_HANDLE
        } else {
            self.source_handle == handle
        }
    }
}

/// Immutable workflow graph; shared between runs as `Arc<Graph>`.
///
/// Per-run edge and node states live in
/// [`GraphTraversal`](super::traversal::GraphTraversal), never here.
#[derive(Debug, Clone)]
pub struct Graph {
    pub(super) nodes: HashMap<String, GraphNode>,
    /// Declaration order, for deterministic iteration.
    pub(super) node_order: Vec<String>,
    pub(super) edges: Vec<GraphEdge>,
    pub(super) in_edges: HashMap<String, Vec<usize>>,
    pub(super) out_edges: HashMap<String, Vec<usize>>,
    pub(super) root_node_id: String,
    /// Defaults declared by the workflow for `env.*` selectors.
    pub(super) environment: Vec<(String, serde_json::Value)>,
}

impl Graph {
    pub fn root_node_id(&self) -> &str {
        &self.root_node_id
    }

    pub fn environment_defaults(&self) -> &[(String, serde_json::Value)] {
        &self.environment
    }

    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.nodes.get(node_id)
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn edge(&self, index: usize) -> Option<&GraphEdge> {
        self.edges.get(index)
    }

    /// Indices into [`edges`](Self::edges) of the edges ending at `node_id`.
    pub fn incoming_edges(&self, node_id: &str) -> &[usize] {
        self.in_edges.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Indices into [`edges`](Self::edges) of the edges leaving `node_id`.
    pub fn outgoing_edges(&self, node_id: &str) -> &[usize] {
        self.out_edges.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_edge_with_handle(&self, node_id: &str, handle: &str) -> bool {
        self.outgoing_edges(node_id)
            .iter()
            .any(|&i| self.edges[i].source_handle == handle)
    }

    pub fn successors(&self, node_id: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for &i in self.outgoing_edges(node_id) {
            let target = self.edges[i].target.as_str();
            if !out.contains(&target) {
                out.push(target);
            }
        }
        out
    }
}
