//! Per-run edge and node traversal states.
//!
//! A node becomes ready once every incoming edge is resolved and at least
//! one of them was taken. A node whose incoming edges were all skipped is
//! skipped itself, and the skip propagates downstream.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::types::Graph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EdgeTraversalState {
    #[default]
    Pending,
    Taken,
    Skipped,
}

/// Serializable traversal bookkeeping for one run over a [`Graph`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphTraversal {
    edge_states: Vec<EdgeTraversalState>,
    node_states: HashMap<String, EdgeTraversalState>,
}

impl GraphTraversal {
    pub fn new(graph: &Graph) -> Self {
        Self {
            edge_states: vec![EdgeTraversalState::Pending; graph.edges().len()],
            node_states: HashMap::new(),
        }
    }

    /// Whether this state was produced for a graph of the same shape.
    pub fn matches(&self, graph: &Graph) -> bool {
        self.edge_states.len() == graph.edges().len()
            && self.node_states.keys().all(|id| graph.contains_node(id))
    }

    pub fn edge_state(&self, index: usize) -> EdgeTraversalState {
        self.edge_states.get(index).copied().unwrap_or_default()
    }

    pub fn node_state(&self, node_id: &str) -> EdgeTraversalState {
        self.node_states.get(node_id).copied().unwrap_or_default()
    }

    pub fn is_node_ready(&self, graph: &Graph, node_id: &str) -> bool {
        if self.node_state(node_id) != EdgeTraversalState::Pending {
            return false;
        }
        let incoming = graph.incoming_edges(node_id);
        if incoming.is_empty() {
            return node_id == graph.root_node_id();
        }
        let mut any_taken = false;
        for &i in incoming {
            match self.edge_state(i) {
                EdgeTraversalState::Pending => return false,
                EdgeTraversalState::Taken => any_taken = true,
                EdgeTraversalState::Skipped => {}
            }
        }
        any_taken
    }

    /// Record that `node_id` finished and selected `handle`.
    ///
    /// Returns the downstream nodes that became ready, in edge order.
    pub fn complete_node(&mut self, graph: &Graph, node_id: &str, handle: &str) -> Vec<String> {
        self.node_states
            .insert(node_id.to_string(), EdgeTraversalState::Taken);
        for &i in graph.outgoing_edges(node_id) {
            let taken = graph
                .edge(i)
                .map(|edge| edge.matches_handle(handle))
                .unwrap_or(false);
            self.edge_states[i] = if taken {
                EdgeTraversalState::Taken
            } else {
                EdgeTraversalState::Skipped
            };
        }

        let mut ready = Vec::new();
        for target in graph.successors(node_id) {
            self.resolve(graph, target, &mut ready);
        }
        ready
    }

    fn resolve(&mut self, graph: &Graph, node_id: &str, ready: &mut Vec<String>) {
        if self.node_state(node_id) != EdgeTraversalState::Pending {
            return;
        }
        let incoming = graph.incoming_edges(node_id);
        if incoming
            .iter()
            .any(|&i| self.edge_state(i) == EdgeTraversalState::Pending)
        {
            return;
        }
        if incoming
            .iter()
            .any(|&i| self.edge_state(i) == EdgeTraversalState::Taken)
        {
            if !ready.iter().any(|id| id == node_id) {
                ready.push(node_id.to_string());
            }
            return;
        }

        self.node_states
            .insert(node_id.to_string(), EdgeTraversalState::Skipped);
        for &i in graph.outgoing_edges(node_id) {
            self.edge_states[i] = EdgeTraversalState::Skipped;
        }
        for target in graph.successors(node_id) {
            self.resolve(graph, target, ready);
        }
    }
}
