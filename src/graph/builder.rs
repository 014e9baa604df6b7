use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use crate::dsl::schema::{NodeExecutionType, NodeType, WorkflowSchema, DEFAULT_SOURCE_HANDLE};
use crate::error::WorkflowError;

use super::node_config::NodeConfig;
use super::types::*;

impl Graph {
    /// Build an immutable graph from a parsed workflow definition.
    ///
    /// The root defaults to the Start (or event source) node among nodes
    /// without incoming edges. With `skip_validation` (nested container
    /// graphs), the root defaults to the node without incoming edges,
    /// preferring a container-start node, and the root-type and
    /// reachability checks are skipped. Cycle detection always runs.
    pub fn init(
        schema: &WorkflowSchema,
        root_node_id: Option<&str>,
        skip_validation: bool,
    ) -> Result<Graph, WorkflowError> {
        if schema.nodes.is_empty() {
            return Err(WorkflowError::GraphValidationError(
                "Graph must have at least one node".to_string(),
            ));
        }

        let mut nodes = HashMap::with_capacity(schema.nodes.len());
        let mut node_order = Vec::with_capacity(schema.nodes.len());
        for node_schema in &schema.nodes {
            let node_type = NodeType::parse(&node_schema.data.node_type).ok_or_else(|| {
                WorkflowError::GraphValidationError(format!(
                    "node '{}' has unknown type '{}'",
                    node_schema.id, node_schema.data.node_type
                ))
            })?;
            let config = NodeConfig::decode(&node_schema.id, node_type, &node_schema.data.extra)?;
            let node = GraphNode {
                id: node_schema.id.clone(),
                node_type,
                title: if node_schema.data.title.is_empty() {
                    node_schema.id.clone()
                } else {
                    node_schema.data.title.clone()
                },
                config,
                error_strategy: node_schema.data.error_strategy.clone(),
                retry_config: node_schema.data.retry_config.clone(),
                timeout_secs: node_schema.data.timeout_secs,
            };
            if nodes.insert(node_schema.id.clone(), node).is_some() {
                return Err(WorkflowError::GraphValidationError(format!(
                    "duplicate node id '{}'",
                    node_schema.id
                )));
            }
            node_order.push(node_schema.id.clone());
        }

        let mut edges = Vec::with_capacity(schema.edges.len());
        let mut in_edges: HashMap<String, Vec<usize>> = HashMap::new();
        let mut out_edges: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, edge_schema) in schema.edges.iter().enumerate() {
            for endpoint in [&edge_schema.source, &edge_schema.target] {
                if !nodes.contains_key(endpoint) {
                    return Err(WorkflowError::GraphValidationError(format!(
                        "edge '{}' references unknown node '{}'",
                        edge_schema.id, endpoint
                    )));
                }
            }
            let id = if edge_schema.id.is_empty() {
                format!("{}-{}-{}", edge_schema.source, edge_schema.target, index)
            } else {
                edge_schema.id.clone()
            };
            let source_handle = if edge_schema.source_handle.is_empty() {
                DEFAULT_SOURCE_HANDLE.to_string()
            } else {
                edge_schema.source_handle.clone()
            };
            out_edges
                .entry(edge_schema.source.clone())
                .or_default()
                .push(index);
            in_edges
                .entry(edge_schema.target.clone())
                .or_default()
                .push(index);
            edges.push(GraphEdge {
                id,
                source: edge_schema.source.clone(),
                target: edge_schema.target.clone(),
                source_handle,
            });
        }

        let root_node_id = resolve_root(
            &nodes,
            &node_order,
            &in_edges,
            root_node_id,
            skip_validation,
        )?;

        let graph = Graph {
            nodes,
            node_order,
            edges,
            in_edges,
            out_edges,
            root_node_id,
            environment: schema
                .environment_variables
                .iter()
                .map(|var| (var.name.clone(), var.value.clone()))
                .collect(),
        };

        let (pg, index_of) = graph.to_petgraph();
        if petgraph::algo::is_cyclic_directed(&pg) {
            let culprit = find_cycle_node(&graph, &pg, &index_of);
            return Err(WorkflowError::CycleDetected(culprit));
        }

        if !skip_validation {
            let root_type = graph
                .node(&graph.root_node_id)
                .map(|n| n.node_type)
                .ok_or_else(|| WorkflowError::NodeNotFound(graph.root_node_id.clone()))?;
            if root_type.requires_container() {
                return Err(WorkflowError::GraphValidationError(format!(
                    "root node '{}' of type {} can only be used inside a container",
                    graph.root_node_id, root_type
                )));
            }

            let mut reached = HashSet::new();
            let start = index_of[graph.root_node_id.as_str()];
            let mut dfs = Dfs::new(&pg, start);
            while let Some(ix) = dfs.next(&pg) {
                reached.insert(ix);
            }
            for id in &graph.node_order {
                if !reached.contains(&index_of[id.as_str()]) {
                    return Err(WorkflowError::GraphValidationError(format!(
                        "node '{}' is not reachable from root '{}'",
                        id, graph.root_node_id
                    )));
                }
            }
        }

        Ok(graph)
    }

    fn to_petgraph(&self) -> (DiGraph<&str, ()>, HashMap<&str, NodeIndex>) {
        let mut pg = DiGraph::with_capacity(self.nodes.len(), self.edges.len());
        let mut index_of = HashMap::with_capacity(self.nodes.len());
        for id in &self.node_order {
            index_of.insert(id.as_str(), pg.add_node(id.as_str()));
        }
        for edge in &self.edges {
            pg.add_edge(
                index_of[edge.source.as_str()],
                index_of[edge.target.as_str()],
                (),
            );
        }
        (pg, index_of)
    }
}

fn resolve_root(
    nodes: &HashMap<String, GraphNode>,
    node_order: &[String],
    in_edges: &HashMap<String, Vec<usize>>,
    requested: Option<&str>,
    skip_validation: bool,
) -> Result<String, WorkflowError> {
    let has_incoming = |id: &str| in_edges.get(id).map(|v| !v.is_empty()).unwrap_or(false);

    if let Some(root) = requested {
        if !nodes.contains_key(root) {
            return Err(WorkflowError::GraphValidationError(format!(
                "root node '{}' not found",
                root
            )));
        }
        if has_incoming(root) {
            return Err(WorkflowError::GraphValidationError(format!(
                "root node '{}' must not have incoming edges",
                root
            )));
        }
        return Ok(root.to_string());
    }

    let candidates: Vec<&GraphNode> = node_order
        .iter()
        .filter(|id| !has_incoming(id.as_str()))
        .filter_map(|id| nodes.get(id))
        .collect();

    let roots: Vec<&GraphNode> = candidates
        .iter()
        .copied()
        .filter(|n| n.node_type.execution_type() == NodeExecutionType::Root)
        .collect();

    if skip_validation {
        if let Some(start) = candidates.iter().find(|n| n.node_type.requires_container()) {
            return Ok(start.id.clone());
        }
        if let Some(root) = roots.first() {
            return Ok(root.id.clone());
        }
        return match candidates.as_slice() {
            [only] => Ok(only.id.clone()),
            [] => Err(WorkflowError::GraphValidationError(
                "graph has no node without incoming edges".to_string(),
            )),
            _ => Err(WorkflowError::GraphValidationError(
                "graph has several nodes without incoming edges and no start node".to_string(),
            )),
        };
    }

    match roots.as_slice() {
        [only] => Ok(only.id.clone()),
        [] => Err(WorkflowError::GraphValidationError(
            "graph has no start node without incoming edges".to_string(),
        )),
        many => Err(WorkflowError::GraphValidationError(format!(
            "graph has {} start nodes; pass an explicit root node id",
            many.len()
        ))),
    }
}

/// Name a node that sits on a cycle, for the error message.
fn find_cycle_node(
    graph: &Graph,
    pg: &DiGraph<&str, ()>,
    index_of: &HashMap<&str, NodeIndex>,
) -> String {
    for scc in petgraph::algo::kosaraju_scc(pg) {
        let on_cycle = scc.len() > 1
            || scc
                .first()
                .map(|&ix| pg.contains_edge(ix, ix))
                .unwrap_or(false);
        if on_cycle {
            // Report the first node in declaration order.
            let members: HashSet<NodeIndex> = scc.into_iter().collect();
            if let Some(id) = graph
                .node_order
                .iter()
                .find(|id| members.contains(&index_of[id.as_str()]))
            {
                return id.clone();
            }
        }
    }
    graph.root_node_id.clone()
}
