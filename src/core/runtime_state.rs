//! Mutable state of one run: pool, runtime nodes, traversal, counters.
//!
//! Only the dispatcher mutates [`GraphRuntimeState`]; layers and nodes see it
//! through shared references or copies.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::variable_pool::VariablePool;
use crate::domain::execution::{RuntimeNodeStatus, Segment};
use crate::domain::model::{PauseDetail, Selector};
use crate::dsl::schema::{NodeRunResult, NodeType};
use crate::error::{WorkflowError, WorkflowResult};
use crate::graph::{Graph, GraphNode, GraphTraversal};

const SNAPSHOT_VERSION: u32 = 1;

/// One execution instance of a graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeNode {
    pub id: String,
    pub node_id: String,
    pub node_type: NodeType,
    pub node_title: String,
    pub status: RuntimeNodeStatus,
    pub start_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub node_run_result: Option<NodeRunResult>,
    pub failed_reason: Option<String>,
    pub paused_by: Option<String>,
    /// The runtime node this one continues (set when resuming a pause).
    pub predecessor_runtime_node_id: Option<String>,
}

impl RuntimeNode {
    pub fn new(id: impl Into<String>, node: &GraphNode) -> Self {
        Self {
            id: id.into(),
            node_id: node.id.clone(),
            node_type: node.node_type,
            node_title: node.title.clone(),
            status: RuntimeNodeStatus::Pending,
            start_at: None,
            paused_at: None,
            finished_at: None,
            node_run_result: None,
            failed_reason: None,
            paused_by: None,
            predecessor_runtime_node_id: None,
        }
    }
}

/// Append-only record of every runtime node of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeGraph {
    nodes: HashMap<String, RuntimeNode>,
    order: Vec<String>,
}

impl RuntimeGraph {
    pub fn add_runtime_node(&mut self, node: RuntimeNode) -> String {
        let id = node.id.clone();
        self.order.push(id.clone());
        self.nodes.insert(id.clone(), node);
        id
    }

    /// Link `target` as the continuation of `source`.
    pub fn add_link(&mut self, source: &str, target: &str) -> WorkflowResult<()> {
        if !self.nodes.contains_key(source) {
            return Err(WorkflowError::NodeNotFound(source.to_string()));
        }
        let node = self
            .nodes
            .get_mut(target)
            .ok_or_else(|| WorkflowError::NodeNotFound(target.to_string()))?;
        node.predecessor_runtime_node_id = Some(source.to_string());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&RuntimeNode> {
        self.nodes.get(id)
    }

    /// Runtime nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &RuntimeNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn transition(&mut self, id: &str, next: RuntimeNodeStatus) -> WorkflowResult<&mut RuntimeNode> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;
        if !node.status.can_transition_to(next) {
            return Err(WorkflowError::InvalidStateTransition {
                runtime_node_id: id.to_string(),
                from: node.status.to_string(),
                to: next.to_string(),
            });
        }
        node.status = next;
        Ok(node)
    }

    pub fn mark_running(&mut self, id: &str, at: DateTime<Utc>) -> WorkflowResult<()> {
        let node = self.transition(id, RuntimeNodeStatus::Running)?;
        node.start_at = Some(at);
        Ok(())
    }

    pub fn mark_succeeded(
        &mut self,
        id: &str,
        result: NodeRunResult,
        at: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        let node = self.transition(id, RuntimeNodeStatus::Success)?;
        node.finished_at = Some(at);
        node.node_run_result = Some(result);
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        id: &str,
        reason: impl Into<String>,
        result: Option<NodeRunResult>,
        at: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        let node = self.transition(id, RuntimeNodeStatus::Failed)?;
        node.finished_at = Some(at);
        node.failed_reason = Some(reason.into());
        node.node_run_result = result;
        Ok(())
    }

    pub fn mark_paused(
        &mut self,
        id: &str,
        paused_by: impl Into<String>,
        result: NodeRunResult,
        at: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        let node = self.transition(id, RuntimeNodeStatus::Paused)?;
        node.paused_at = Some(at);
        node.paused_by = Some(paused_by.into());
        node.node_run_result = Some(result);
        Ok(())
    }
}

/// A node waiting to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyNode {
    pub node_id: String,
    /// Pre-created runtime node (resumption); a new one is created otherwise.
    #[serde(default)]
    pub runtime_node_id: Option<String>,
}

impl ReadyNode {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            runtime_node_id: None,
        }
    }
}

/// Who runs the workflow and for which app.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionIdentity {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub workflow_type: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_from: String,
    #[serde(default)]
    pub invoke_from: String,
}

/// Data a host passes back when resuming a pause.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Paused graph node the action and form data are for. May be left out
    /// while only one node is paused.
    #[serde(default)]
    pub node_id: Option<String>,
    /// Action id chosen on a human input form.
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub form_data: HashMap<String, Value>,
}

/// Variable under which a resumption delivers the chosen action.
pub const RESUME_ACTION_VARIABLE: &str = "__action";

pub struct GraphRuntimeState {
    pub identity: ExecutionIdentity,
    pub workflow_execution_id: String,
    pub call_depth: u32,
    pub start_at: DateTime<Utc>,
    pub variable_pool: VariablePool,
    pub runtime_graph: RuntimeGraph,
    pub traversal: GraphTraversal,
    pub ready_queue: VecDeque<ReadyNode>,
    /// Pauses recorded since the last resumption.
    pub pause_details: Vec<PauseDetail>,
    /// Aggregated outputs of End/Answer nodes.
    pub outputs: HashMap<String, Value>,
    total_tokens: i64,
    node_run_steps: i32,
    exceptions_count: u32,
    graph: Arc<Graph>,
}

#[derive(Serialize, Deserialize)]
struct StateSnapshot {
    version: u32,
    identity: ExecutionIdentity,
    workflow_execution_id: String,
    call_depth: u32,
    start_at: DateTime<Utc>,
    variables: HashMap<String, Segment>,
    runtime_graph: RuntimeGraph,
    traversal: GraphTraversal,
    ready_queue: VecDeque<ReadyNode>,
    pause_details: Vec<PauseDetail>,
    outputs: HashMap<String, Value>,
    total_tokens: i64,
    node_run_steps: i32,
    exceptions_count: u32,
}

impl GraphRuntimeState {
    pub fn new(
        graph: Arc<Graph>,
        variable_pool: VariablePool,
        identity: ExecutionIdentity,
        workflow_execution_id: impl Into<String>,
        start_at: DateTime<Utc>,
    ) -> Self {
        let traversal = GraphTraversal::new(&graph);
        let mut ready_queue = VecDeque::new();
        ready_queue.push_back(ReadyNode::new(graph.root_node_id()));
        Self {
            identity,
            workflow_execution_id: workflow_execution_id.into(),
            call_depth: 0,
            start_at,
            variable_pool,
            runtime_graph: RuntimeGraph::default(),
            traversal,
            ready_queue,
            pause_details: Vec::new(),
            outputs: HashMap::new(),
            total_tokens: 0,
            node_run_steps: 0,
            exceptions_count: 0,
            graph,
        }
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    pub fn total_tokens(&self) -> i64 {
        self.total_tokens
    }

    pub fn add_tokens(&mut self, tokens: i64) {
        self.total_tokens += tokens.max(0);
    }

    pub fn node_run_steps(&self) -> i32 {
        self.node_run_steps
    }

    pub fn increment_steps(&mut self) -> i32 {
        self.node_run_steps += 1;
        self.node_run_steps
    }

    pub fn exceptions_count(&self) -> u32 {
        self.exceptions_count
    }

    pub fn record_exception(&mut self) {
        self.exceptions_count += 1;
    }

    /// Serialize everything a later resumption needs.
    pub fn snapshot(&self) -> WorkflowResult<Vec<u8>> {
        let snapshot = StateSnapshot {
            version: SNAPSHOT_VERSION,
            identity: self.identity.clone(),
            workflow_execution_id: self.workflow_execution_id.clone(),
            call_depth: self.call_depth,
            start_at: self.start_at,
            variables: self.variable_pool.to_entries(),
            runtime_graph: self.runtime_graph.clone(),
            traversal: self.traversal.clone(),
            ready_queue: self.ready_queue.clone(),
            pause_details: self.pause_details.clone(),
            outputs: self.outputs.clone(),
            total_tokens: self.total_tokens,
            node_run_steps: self.node_run_steps,
            exceptions_count: self.exceptions_count,
        };
        serde_json::to_vec(&snapshot).map_err(|e| WorkflowError::SerializationError(e.to_string()))
    }

    /// Rebuild state from [`snapshot`](Self::snapshot) bytes over `graph`.
    pub fn restore(bytes: &[u8], graph: Arc<Graph>) -> WorkflowResult<Self> {
        let snapshot: StateSnapshot = serde_json::from_slice(bytes)
            .map_err(|e| WorkflowError::SerializationError(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(WorkflowError::SerializationError(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        if !snapshot.traversal.matches(&graph)
            || snapshot
                .runtime_graph
                .nodes()
                .any(|n| !graph.contains_node(&n.node_id))
        {
            return Err(WorkflowError::SerializationError(
                "snapshot does not match the workflow graph".to_string(),
            ));
        }
        Ok(Self {
            identity: snapshot.identity,
            workflow_execution_id: snapshot.workflow_execution_id,
            call_depth: snapshot.call_depth,
            start_at: snapshot.start_at,
            variable_pool: VariablePool::from_entries(snapshot.variables),
            runtime_graph: snapshot.runtime_graph,
            traversal: snapshot.traversal,
            ready_queue: snapshot.ready_queue,
            pause_details: snapshot.pause_details,
            outputs: snapshot.outputs,
            total_tokens: snapshot.total_tokens,
            node_run_steps: snapshot.node_run_steps,
            exceptions_count: snapshot.exceptions_count,
            graph,
        })
    }

    /// Re-arm every paused node for a resumed run.
    ///
    /// Each paused runtime node gets a fresh successor runtime node, linked
    /// through `predecessor_runtime_node_id` and queued ahead of other ready
    /// work. The payload is written into the pool of the node it targets
    /// only; other re-armed nodes fall back to their own form submissions.
    pub fn prepare_resume(
        &mut self,
        payload: &ResumePayload,
        next_id: impl Fn() -> String,
    ) -> WorkflowResult<Vec<String>> {
        let paused: Vec<String> = self
            .pause_details
            .iter()
            .filter_map(|d| d.runtime_node_id.clone())
            .collect();
        let target = self.resume_target(payload, &paused)?;
        let mut resumed = Vec::with_capacity(paused.len());

        for paused_id in paused.iter().rev() {
            let paused_node = self
                .runtime_graph
                .get(paused_id)
                .ok_or_else(|| WorkflowError::NodeNotFound(paused_id.clone()))?;
            if paused_node.status != RuntimeNodeStatus::Paused {
                continue;
            }
            let node_id = paused_node.node_id.clone();
            let graph_node = self
                .graph
                .node(&node_id)
                .ok_or_else(|| WorkflowError::NodeNotFound(node_id.clone()))?;

            let new_id = self
                .runtime_graph
                .add_runtime_node(RuntimeNode::new(next_id(), graph_node));
            self.runtime_graph.add_link(paused_id, &new_id)?;

            if target.as_deref() == Some(node_id.as_str()) {
                if let Some(action) = &payload.action {
                    self.variable_pool.set(
                        &Selector::new(node_id.as_str(), RESUME_ACTION_VARIABLE),
                        Segment::String(action.clone()),
                    );
                }
                for (key, value) in &payload.form_data {
                    self.variable_pool.set(
                        &Selector::new(node_id.as_str(), key.as_str()),
                        Segment::from_value(value),
                    );
                }
            }

            self.ready_queue.push_front(ReadyNode {
                node_id,
                runtime_node_id: Some(new_id.clone()),
            });
            resumed.push(new_id);
        }

        self.pause_details.clear();
        resumed.reverse();
        Ok(resumed)
    }

    /// Graph node that receives the payload, if it carries anything.
    fn resume_target(
        &self,
        payload: &ResumePayload,
        paused: &[String],
    ) -> WorkflowResult<Option<String>> {
        let mut paused_nodes: Vec<&str> = paused
            .iter()
            .filter_map(|id| self.runtime_graph.get(id))
            .filter(|n| n.status == RuntimeNodeStatus::Paused)
            .map(|n| n.node_id.as_str())
            .collect();
        paused_nodes.dedup();

        match &payload.node_id {
            Some(node_id) if paused_nodes.contains(&node_id.as_str()) => Ok(Some(node_id.clone())),
            Some(node_id) => Err(WorkflowError::ConfigError(format!(
                "resume target '{}' is not paused, paused nodes: [{}]",
                node_id,
                paused_nodes.join(", ")
            ))),
            None if payload.action.is_none() && payload.form_data.is_empty() => Ok(None),
            None => match paused_nodes.as_slice() {
                [only] => Ok(Some(only.to_string())),
                _ => Err(WorkflowError::ConfigError(format!(
                    "resume payload must name one of the paused nodes: [{}]",
                    paused_nodes.join(", ")
                ))),
            },
        }
    }
}
