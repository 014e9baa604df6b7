pub mod command;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod event_bus;
pub mod event_stream;
pub mod layers;
mod node_worker;
pub mod pause;
pub mod runtime_context;
pub mod runtime_state;
pub mod sub_graph_runner;
pub mod variable_pool;

pub use command::{create_command_channel, Command, CommandReceiver, CommandSender};
pub use config::EngineConfig;
pub use coordinator::{ExecutionCoordinator, VariableUpdate};
pub use dispatcher::{RunOutcome, WorkflowDispatcher};
pub use event_bus::{EngineEvent, EventEmitter, GraphEngineEvent};
pub use event_stream::{EventStream, EventStreamConverter, StreamResponse};
pub use layers::{Layer, LayerError};
pub use runtime_context::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, NodeContext, RealIdGenerator,
    RealTimeProvider, RuntimeContext, TimeProvider,
};
pub use runtime_state::{
    ExecutionIdentity, GraphRuntimeState, ReadyNode, ResumePayload, RuntimeGraph, RuntimeNode,
    RESUME_ACTION_VARIABLE,
};
pub use sub_graph_runner::{DefaultSubGraphRunner, SubGraphOutput, SubGraphRunner};
pub use variable_pool::{SystemVariables, VariablePool};
