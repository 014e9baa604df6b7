//! Typed node configuration, decoded once per node when the graph is built.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::dsl::schema::*;
use crate::error::WorkflowError;

use super::types::Graph;

/// An iteration container with its nested graph already built.
#[derive(Debug, Clone)]
pub struct IterationNodeConfig {
    pub data: IterationNodeData,
    pub graph: Arc<Graph>,
}

/// A loop container with its nested graph already built.
#[derive(Debug, Clone)]
pub struct LoopNodeConfig {
    pub data: LoopNodeData,
    pub graph: Arc<Graph>,
}

/// Per-kind configuration; one variant per [`NodeType`].
#[derive(Debug, Clone)]
pub enum NodeConfig {
    Start(StartNodeData),
    End(EndNodeData),
    Answer(AnswerNodeData),
    IfElse(IfElseNodeData),
    TemplateTransform(TemplateTransformNodeData),
    Code(CodeNodeData),
    EventSource(EventSourceNodeData),
    Iteration(IterationNodeConfig),
    IterationStart,
    Loop(LoopNodeConfig),
    LoopStart,
    HumanInput(HumanInputNodeData),
}

impl NodeConfig {
    /// Decode the type-specific part of a node's data.
    ///
    /// Unknown fields are rejected; container kinds build their nested graph
    /// with validation skipped.
    pub fn decode(
        node_id: &str,
        node_type: NodeType,
        extra: &serde_json::Map<String, Value>,
    ) -> Result<NodeConfig, WorkflowError> {
        let config = match node_type {
            NodeType::Start => NodeConfig::Start(decode_data(node_id, node_type, extra)?),
            NodeType::End => NodeConfig::End(decode_data(node_id, node_type, extra)?),
            NodeType::Answer => NodeConfig::Answer(decode_data(node_id, node_type, extra)?),
            NodeType::IfElse => NodeConfig::IfElse(decode_data(node_id, node_type, extra)?),
            NodeType::TemplateTransform => {
                NodeConfig::TemplateTransform(decode_data(node_id, node_type, extra)?)
            }
            NodeType::Code => NodeConfig::Code(decode_data(node_id, node_type, extra)?),
            NodeType::EventSource => {
                NodeConfig::EventSource(decode_data(node_id, node_type, extra)?)
            }
            NodeType::Iteration => {
                let data: IterationNodeData = decode_data(node_id, node_type, extra)?;
                let graph = build_sub_graph(node_id, &data.sub_graph)?;
                NodeConfig::Iteration(IterationNodeConfig { data, graph })
            }
            NodeType::Loop => {
                let data: LoopNodeData = decode_data(node_id, node_type, extra)?;
                let graph = build_sub_graph(node_id, &data.sub_graph)?;
                NodeConfig::Loop(LoopNodeConfig { data, graph })
            }
            NodeType::IterationStart => {
                let _: ContainerStartNodeData = decode_data(node_id, node_type, extra)?;
                NodeConfig::IterationStart
            }
            NodeType::LoopStart => {
                let _: ContainerStartNodeData = decode_data(node_id, node_type, extra)?;
                NodeConfig::LoopStart
            }
            NodeType::HumanInput => {
                let data: HumanInputNodeData = decode_data(node_id, node_type, extra)?;
                if data.user_actions.is_empty() {
                    return Err(WorkflowError::GraphValidationError(format!(
                        "node '{}': human-input requires at least one user action",
                        node_id
                    )));
                }
                NodeConfig::HumanInput(data)
            }
        };
        Ok(config)
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodeConfig::Start(_) => NodeType::Start,
            NodeConfig::End(_) => NodeType::End,
            NodeConfig::Answer(_) => NodeType::Answer,
            NodeConfig::IfElse(_) => NodeType::IfElse,
            NodeConfig::TemplateTransform(_) => NodeType::TemplateTransform,
            NodeConfig::Code(_) => NodeType::Code,
            NodeConfig::EventSource(_) => NodeType::EventSource,
            NodeConfig::Iteration(_) => NodeType::Iteration,
            NodeConfig::IterationStart => NodeType::IterationStart,
            NodeConfig::Loop(_) => NodeType::Loop,
            NodeConfig::LoopStart => NodeType::LoopStart,
            NodeConfig::HumanInput(_) => NodeType::HumanInput,
        }
    }

    /// One-line summary used in logs.
    pub fn describe(&self) -> String {
        match self {
            NodeConfig::Start(d) => format!("start with {} variable(s)", d.variables.len()),
            NodeConfig::End(d) => format!("end with {} output(s)", d.outputs.len()),
            NodeConfig::Answer(_) => "answer".to_string(),
            NodeConfig::IfElse(d) => format!("if-else with {} case(s)", d.cases.len()),
            NodeConfig::TemplateTransform(d) => {
                format!("template over {} variable(s)", d.variables.len())
            }
            NodeConfig::Code(d) => format!("code ({})", d.language),
            NodeConfig::EventSource(d) => format!("event source '{}'", d.event_type),
            NodeConfig::Iteration(c) => format!(
                "iteration over {} ({} nested node(s))",
                c.data.iterator_selector,
                c.graph.node_count()
            ),
            NodeConfig::IterationStart => "iteration start".to_string(),
            NodeConfig::Loop(c) => format!(
                "loop up to {} round(s) ({} nested node(s))",
                c.data.loop_count,
                c.graph.node_count()
            ),
            NodeConfig::LoopStart => "loop start".to_string(),
            NodeConfig::HumanInput(d) => {
                format!("human input with {} action(s)", d.user_actions.len())
            }
        }
    }
}

fn decode_data<T: DeserializeOwned>(
    node_id: &str,
    node_type: NodeType,
    extra: &serde_json::Map<String, Value>,
) -> Result<T, WorkflowError> {
    serde_json::from_value(Value::Object(extra.clone())).map_err(|e| {
        WorkflowError::GraphValidationError(format!(
            "node '{}' has invalid {} config: {}",
            node_id, node_type, e
        ))
    })
}

fn build_sub_graph(node_id: &str, sub_graph: &SubGraphSchema) -> Result<Arc<Graph>, WorkflowError> {
    let schema = WorkflowSchema {
        version: CURRENT_DSL_VERSION.to_string(),
        nodes: sub_graph.nodes.clone(),
        edges: sub_graph.edges.clone(),
        environment_variables: Vec::new(),
    };
    Graph::init(&schema, None, true)
        .map(Arc::new)
        .map_err(|e| {
            WorkflowError::GraphValidationError(format!(
                "node '{}' has an invalid sub-graph: {}",
                node_id, e
            ))
        })
}
