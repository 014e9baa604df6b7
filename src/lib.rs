//! # flowgraph: an event-driven workflow graph engine
//!
//! `flowgraph` interprets a declarative workflow graph (nodes and edges) and
//! drives it to completion, pause or failure:
//!
//! - **Graph**: built once from a YAML/JSON definition by [`Graph::init`],
//!   which decodes every node's typed config and validates reachability.
//! - **Dispatcher**: a single consumer of the run's event queue; nodes run
//!   concurrently on workers and only produce events.
//! - **Layers**: cross-cutting observers (sandbox provisioning, trigger logs,
//!   tracing) called around the run and on every event.
//! - **Pause/resume**: a human-input node (or a `Pause` command) suspends the
//!   run into a durable snapshot that a later call resumes from.
//! - **Event stream**: engine events map to `{event, workflow_run_id, ...}`
//!   records suitable for server-sent events.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use flowgraph::{parse_dsl, DslFormat, Graph, WorkflowRunner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), flowgraph::WorkflowError> {
//!     let yaml = std::fs::read_to_string("workflow.yaml").unwrap_or_default();
//!     let schema = parse_dsl(&yaml, DslFormat::Yaml)?;
//!     let graph = Arc::new(Graph::init(&schema, None, false)?);
//!     let handle = WorkflowRunner::builder(graph).run().await?;
//!     println!("{:?}", handle.wait().await);
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! | Flag | Description |
//! |------|-------------|
//! | `builtin-core-nodes` | Registers Start, End, Answer, IfElse, EventSource, HumanInput executors |
//! | `builtin-transform-nodes` | Registers the Template Transform executor |
//! | `builtin-subgraph-nodes` | Registers Iteration and Loop executors |

pub mod api;
pub mod core;
pub mod domain;
pub mod dsl;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod logging;
pub mod nodes;
pub mod template;

pub use crate::api::{WorkflowHandle, WorkflowRunner, WorkflowRunnerBuilder};
pub use crate::core::layers::{
    InMemorySandboxRegistry, Layer, LayerError, MemoryTriggerLogSink, SandboxLayer,
    SandboxRegistry, TracingLayer, TriggerLogLayer, TriggerLogSink,
};
pub use crate::core::pause::{
    FilePauseRepository, FormRepository, MemoryFormRepository, MemoryPauseRepository,
    PauseEntity, PauseError, PauseRepository,
};
pub use crate::core::{
    Command, DefaultSubGraphRunner, EngineConfig, EngineEvent, EventStream, EventStreamConverter,
    ExecutionIdentity, FakeIdGenerator, FakeTimeProvider, GraphEngineEvent, GraphRuntimeState,
    IdGenerator, NodeContext, RealIdGenerator, RealTimeProvider, ResumePayload, RunOutcome,
    RuntimeContext, StreamResponse, SubGraphRunner, SystemVariables, TimeProvider, VariablePool,
    WorkflowDispatcher,
};
pub use crate::domain::execution::{ExecutionStatus, Segment};
pub use crate::domain::model::{PauseDetail, PauseType, Selector};
pub use crate::dsl::{parse_dsl, parse_dsl_file, DslFormat, NodeType, WorkflowSchema};
pub use crate::error::{NodeError, WorkflowError, WorkflowResult};
pub use crate::graph::{Graph, NodeConfig};
pub use crate::logging::init_tracing;
pub use crate::nodes::{NodeExecutor, NodeExecutorRegistry};
