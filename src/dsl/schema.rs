use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::execution::{Segment, WorkflowNodeExecutionStatus};
use crate::domain::model::{Case, Condition, IterationErrorMode, LogicalOperator, PauseType, Selector};

// ================================
// Workflow DSL Schema
// ================================

/// Current supported DSL version
pub const CURRENT_DSL_VERSION: &str = "0.1.0";

/// All supported DSL versions
pub const SUPPORTED_DSL_VERSIONS: &[&str] = &["0.1.0"];

/// Handle taken by a node that does not select a branch.
pub const DEFAULT_SOURCE_HANDLE: &str = "source";

/// Handle of the error-handling edge used by the fail-branch strategy.
pub const FAIL_BRANCH_HANDLE: &str = "fail-branch";

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WorkflowSchema {
    /// DSL version string, e.g. "0.1.0"
    pub version: String,
    pub nodes: Vec<NodeSchema>,
    #[serde(default)]
    pub edges: Vec<EdgeSchema>,
    #[serde(default)]
    pub environment_variables: Vec<EnvironmentVariable>,
}

/// Node definition in the DSL.
/// The `data` object embeds the type tag and all node-specific config.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NodeSchema {
    pub id: String,
    pub data: NodeData,
}

/// Common node data. The `type` field selects the typed config that
/// `extra` is decoded into when the graph is built.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NodeData {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub error_strategy: Option<ErrorStrategyConfig>,
    #[serde(default)]
    pub retry_config: Option<RetryConfig>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// All remaining fields are captured here as a JSON map.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EdgeSchema {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default = "default_source_handle", alias = "sourceHandle")]
    pub source_handle: String,
}

fn default_source_handle() -> String {
    DEFAULT_SOURCE_HANDLE.to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EnvironmentVariable {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

// ================================
// Error strategy / retry
// ================================

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ErrorStrategyConfig {
    #[serde(rename = "type")]
    pub strategy_type: ErrorStrategyType,
    #[serde(default)]
    pub default_value: HashMap<String, Value>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorStrategyType {
    None,
    FailBranch,
    DefaultValue,
}

impl<'de> Deserialize<'de> for ErrorStrategyConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Accepts both `error_strategy: fail-branch` and the object form.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Short(ErrorStrategyType),
            Full {
                #[serde(rename = "type")]
                strategy_type: ErrorStrategyType,
                #[serde(default)]
                default_value: HashMap<String, Value>,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Short(strategy_type) => ErrorStrategyConfig {
                strategy_type,
                default_value: HashMap::new(),
            },
            Repr::Full {
                strategy_type,
                default_value,
            } => ErrorStrategyConfig {
                strategy_type,
                default_value,
            },
        })
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: i32,
    /// Base interval in milliseconds.
    #[serde(default)]
    pub retry_interval: i32,
    #[serde(default = "default_backoff_strategy")]
    pub backoff_strategy: BackoffStrategy,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_retry_interval")]
    pub max_retry_interval: i32,
    #[serde(default = "default_retry_on_retryable_only")]
    pub retry_on_retryable_only: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
    ExponentialWithJitter,
}

fn default_backoff_strategy() -> BackoffStrategy {
    BackoffStrategy::Fixed
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_retry_interval() -> i32 {
    60000
}
fn default_retry_on_retryable_only() -> bool {
    true
}

// ================================
// Node Type Enum
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Start,
    End,
    Answer,
    IfElse,
    TemplateTransform,
    Code,
    EventSource,
    Iteration,
    IterationStart,
    Loop,
    LoopStart,
    HumanInput,
}

impl NodeType {
    pub fn parse(s: &str) -> Option<NodeType> {
        serde_json::from_value(Value::String(s.to_string())).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "start",
            NodeType::End => "end",
            NodeType::Answer => "answer",
            NodeType::IfElse => "if-else",
            NodeType::TemplateTransform => "template-transform",
            NodeType::Code => "code",
            NodeType::EventSource => "event-source",
            NodeType::Iteration => "iteration",
            NodeType::IterationStart => "iteration-start",
            NodeType::Loop => "loop",
            NodeType::LoopStart => "loop-start",
            NodeType::HumanInput => "human-input",
        }
    }

    pub fn execution_type(&self) -> NodeExecutionType {
        match self {
            NodeType::Start | NodeType::EventSource => NodeExecutionType::Root,
            NodeType::End | NodeType::Answer => NodeExecutionType::Response,
            NodeType::IfElse | NodeType::HumanInput => NodeExecutionType::Branch,
            NodeType::Iteration | NodeType::Loop => NodeExecutionType::Container,
            _ => NodeExecutionType::Executable,
        }
    }

    /// Entry nodes of a container sub-graph; never valid as a top-level root.
    pub fn requires_container(&self) -> bool {
        matches!(self, NodeType::IterationStart | NodeType::LoopStart)
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeExecutionType {
    Executable,
    Response,
    Branch,
    Container,
    Root,
}

// ================================
// Start / Event Source
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct StartNodeData {
    #[serde(default)]
    pub variables: Vec<StartVariable>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StartVariable {
    pub variable: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default = "default_var_type")]
    pub var_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub default: Option<Value>,
}

fn default_var_type() -> String {
    "string".to_string()
}

/// A trigger root: the payload fields become the node's outputs.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct EventSourceNodeData {
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub variables: Vec<StartVariable>,
}

// ================================
// End / Answer
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct EndNodeData {
    #[serde(default)]
    pub outputs: Vec<OutputVariable>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputVariable {
    pub variable: String,
    pub value_selector: Selector,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct AnswerNodeData {
    pub answer: String,
    #[serde(default)]
    pub variables: Vec<VariableMapping>,
}

// ================================
// IfElse
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct IfElseNodeData {
    pub cases: Vec<Case>,
}

// ================================
// Template Transform / Code
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct TemplateTransformNodeData {
    pub template: String,
    #[serde(default)]
    pub variables: Vec<VariableMapping>,
    /// Overrides the engine-wide `template_max_output_length`.
    #[serde(default)]
    pub max_output_length: Option<usize>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct VariableMapping {
    pub variable: String,
    pub value_selector: Selector,
}

/// Code runs in a host-provided executor; the engine only validates shape.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CodeNodeData {
    #[serde(default)]
    pub code: String,
    #[serde(default = "default_code_language", alias = "code_language")]
    pub language: String,
    #[serde(default)]
    pub variables: Vec<VariableMapping>,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
}

fn default_code_language() -> String {
    "python3".to_string()
}

// ================================
// Containers
// ================================

/// Nested graph definition embedded in a container node.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SubGraphSchema {
    pub nodes: Vec<NodeSchema>,
    #[serde(default)]
    pub edges: Vec<EdgeSchema>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct IterationNodeData {
    pub iterator_selector: Selector,
    pub output_selector: Selector,
    #[serde(default)]
    pub is_parallel: bool,
    #[serde(default)]
    pub parallel_nums: Option<u32>,
    #[serde(default)]
    pub error_handle_mode: IterationErrorMode,
    pub sub_graph: SubGraphSchema,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct LoopNodeData {
    #[serde(default = "default_loop_count")]
    pub loop_count: u32,
    #[serde(default)]
    pub break_conditions: Vec<Condition>,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub loop_variables: Vec<LoopVariable>,
    pub sub_graph: SubGraphSchema,
}

fn default_loop_count() -> u32 {
    10
}

/// A value carried across loop rounds, addressable as `(loop_node_id, label)`.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoopVariable {
    pub label: String,
    #[serde(default)]
    pub value: Value,
    /// Initial value read from the pool instead of `value`.
    #[serde(default)]
    pub value_selector: Option<Selector>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ContainerStartNodeData {}

// ================================
// Human input
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct HumanInputNodeData {
    #[serde(default)]
    pub form_content: String,
    #[serde(default)]
    pub inputs: Vec<FormInput>,
    pub user_actions: Vec<UserAction>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct FormInput {
    pub output_variable_name: String,
    #[serde(rename = "type", default = "default_var_type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct UserAction {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

// ================================
// Node Run Result
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct LlmUsage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

/// The result of running one node body.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NodeRunResult {
    pub status: WorkflowNodeExecutionStatus,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub process_data: HashMap<String, Value>,
    #[serde(default)]
    pub outputs: HashMap<String, Segment>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub llm_usage: Option<LlmUsage>,
    /// Branch handle selected by the node; `"source"` takes every normal edge.
    pub edge_source_handle: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub retry_index: i32,
    #[serde(default)]
    pub error_detail: Option<Value>,
    /// Set together with `status == Paused`.
    #[serde(default)]
    pub pause_type: Option<PauseType>,
}

impl Default for NodeRunResult {
    fn default() -> Self {
        NodeRunResult {
            status: WorkflowNodeExecutionStatus::Succeeded,
            inputs: HashMap::new(),
            process_data: HashMap::new(),
            outputs: HashMap::new(),
            metadata: HashMap::new(),
            llm_usage: None,
            edge_source_handle: DEFAULT_SOURCE_HANDLE.to_string(),
            error: None,
            error_type: None,
            retry_index: 0,
            error_detail: None,
            pause_type: None,
        }
    }
}

impl NodeRunResult {
    pub fn paused(pause_type: PauseType) -> Self {
        NodeRunResult {
            status: WorkflowNodeExecutionStatus::Paused,
            pause_type: Some(pause_type),
            ..Default::default()
        }
    }

    pub fn total_tokens(&self) -> i64 {
        self.llm_usage.as_ref().map(|u| u.total_tokens).unwrap_or(0)
    }

    /// Plain JSON view of the outputs.
    pub fn output_values(&self) -> HashMap<String, Value> {
        self.outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect()
    }
}
