#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use flowgraph::dsl::schema::NodeRunResult;
use flowgraph::{
    parse_dsl, DslFormat, ExecutionStatus, Graph, GraphEngineEvent, NodeConfig, NodeContext,
    NodeError, NodeExecutor, NodeExecutorRegistry, NodeType, Segment, VariablePool,
    WorkflowHandle,
};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn with_timeout<F, T>(label: &str, duration: Duration, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(duration, f)
        .await
        .unwrap_or_else(|_| panic!("'{}' timed out after {:?}", label, duration))
}

pub fn graph(yaml: &str) -> Arc<Graph> {
    let schema = parse_dsl(yaml, DslFormat::Yaml).expect("workflow should parse");
    Arc::new(Graph::init(&schema, None, false).expect("workflow should build"))
}

/// Wait for the run to end and return its status and full event history.
pub async fn finish(handle: &WorkflowHandle) -> (ExecutionStatus, Vec<GraphEngineEvent>) {
    let status = with_timeout("workflow run", TEST_TIMEOUT, handle.wait()).await;
    (status, handle.events())
}

/// Compact labels for the graph and node lifecycle events; chunks and
/// retries are left out.
pub fn labels(events: &[GraphEngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            GraphEngineEvent::GraphRunStarted { .. } => Some("GraphStarted".to_string()),
            GraphEngineEvent::GraphRunSucceeded { .. } => Some("GraphSucceeded".to_string()),
            GraphEngineEvent::GraphRunPartialSucceeded { .. } => {
                Some("GraphPartialSucceeded".to_string())
            }
            GraphEngineEvent::GraphRunFailed { .. } => Some("GraphFailed".to_string()),
            GraphEngineEvent::GraphRunAborted { .. } => Some("GraphAborted".to_string()),
            GraphEngineEvent::GraphRunPaused { .. } => Some("GraphPaused".to_string()),
            GraphEngineEvent::NodeRunStarted { node_id, .. } => {
                Some(format!("NodeStarted({})", node_id))
            }
            GraphEngineEvent::NodeRunSucceeded { node_id, .. } => {
                Some(format!("NodeSucceeded({})", node_id))
            }
            GraphEngineEvent::NodeRunFailed { node_id, .. } => {
                Some(format!("NodeFailed({})", node_id))
            }
            GraphEngineEvent::NodeRunException { node_id, .. } => {
                Some(format!("NodeException({})", node_id))
            }
            GraphEngineEvent::NodeRunPaused { node_id, .. } => {
                Some(format!("NodePaused({})", node_id))
            }
            GraphEngineEvent::NodeRunStreamChunk { .. } | GraphEngineEvent::NodeRunRetry { .. } => {
                None
            }
        })
        .collect()
}

pub fn position(labels: &[String], label: &str) -> usize {
    labels
        .iter()
        .position(|l| l == label)
        .unwrap_or_else(|| panic!("{} not found in {:?}", label, labels))
}

pub fn started(events: &[GraphEngineEvent], node_id: &str) -> bool {
    events.iter().any(|e| {
        matches!(e, GraphEngineEvent::NodeRunStarted { node_id: n, .. } if n == node_id)
    })
}

/// Stand-in for a host code executor, driven by the node's `code` field.
///
/// The script is a `;`-separated list of steps:
/// `sleep <ms>`, `fail <n>` (fail the first n attempts), `fail` (always
/// fail) and `wait_cancel` (block until the run is cancelled). A node that
/// gets through its script outputs `result = <node id>`.
#[derive(Default)]
pub struct ScriptedCode {
    attempts: Mutex<HashMap<String, u32>>,
    completed: Mutex<Vec<String>>,
}

impl ScriptedCode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Node ids in the order their scripts finished successfully.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    pub fn attempts(&self, node_id: &str) -> u32 {
        self.attempts.lock().get(node_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl NodeExecutor for ScriptedCode {
    async fn execute(
        &self,
        node_id: &str,
        config: &NodeConfig,
        _variable_pool: &VariablePool,
        context: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let NodeConfig::Code(data) = config else {
            return Err(NodeError::ConfigError("expected a code node".into()));
        };
        let attempt = {
            let mut attempts = self.attempts.lock();
            let count = attempts.entry(node_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        for step in data.code.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let mut parts = step.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("sleep"), Some(ms)) => {
                    let ms: u64 = ms.parse().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                (Some("fail"), Some(n)) => {
                    if attempt <= n.parse().unwrap_or(0) {
                        return Err(NodeError::ExecutionError(format!(
                            "attempt {} failed",
                            attempt
                        )));
                    }
                }
                (Some("fail"), None) => {
                    return Err(NodeError::ExecutionError("script failed".into()));
                }
                (Some("wait_cancel"), None) => {
                    while !context.is_cancelled() {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    return Err(NodeError::Cancelled);
                }
                _ => return Err(NodeError::ConfigError(format!("bad step: {}", step))),
            }
        }

        self.completed.lock().push(node_id.to_string());
        let mut result = NodeRunResult::default();
        result
            .outputs
            .insert("result".to_string(), Segment::from(node_id));
        Ok(result)
    }
}

pub fn registry_with(code: Arc<ScriptedCode>) -> Arc<NodeExecutorRegistry> {
    Arc::new(NodeExecutorRegistry::new().with(NodeType::Code, code))
}
