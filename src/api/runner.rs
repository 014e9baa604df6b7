//! High-level workflow runner and builder.
//!
//! [`WorkflowRunner`] (constructed via [`WorkflowRunnerBuilder`]) is the main
//! entry point for executing a built [`Graph`]. It wires together the
//! dispatcher, the variable pool, node executors, layers and the pause
//! repositories, then hands back a [`WorkflowHandle`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::info;

use crate::core::command::create_command_channel;
use crate::core::config::EngineConfig;
use crate::core::dispatcher::{RunOutcome, WorkflowDispatcher};
use crate::core::event_bus::{create_event_channel, EventEmitter};
use crate::core::layers::Layer;
use crate::core::pause::{FormRepository, PauseRepository};
use crate::core::runtime_context::{
    IdGenerator, RealIdGenerator, RealTimeProvider, RuntimeContext, TimeProvider,
};
use crate::core::runtime_state::{ExecutionIdentity, GraphRuntimeState, ResumePayload};
use crate::core::sub_graph_runner::SubGraphRunner;
use crate::core::variable_pool::{SystemVariables, VariablePool};
use crate::domain::execution::{ExecutionStatus, Segment};
use crate::domain::model::Selector;
use crate::error::{WorkflowError, WorkflowResult};
use crate::graph::Graph;
use crate::nodes::executor::NodeExecutorRegistry;

use super::handle::{EventLog, WorkflowHandle};

const ENVIRONMENT_NODE_ID: &str = "env";
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

/// Workflow runner with builder-based configuration.
///
/// Use [`WorkflowRunner::builder(graph)`](Self::builder) to obtain a
/// [`WorkflowRunnerBuilder`].
pub struct WorkflowRunner;

impl WorkflowRunner {
    /// Create a new builder for a built graph.
    pub fn builder(graph: Arc<Graph>) -> WorkflowRunnerBuilder {
        WorkflowRunnerBuilder {
            graph,
            user_inputs: HashMap::new(),
            system_vars: SystemVariables::default(),
            environment_vars: HashMap::new(),
            config: EngineConfig::default(),
            registry: None,
            layers: Vec::new(),
            pause_repository: None,
            form_repository: None,
            sub_graph_runner: None,
            id_generator: Arc::new(RealIdGenerator::default()),
            time_provider: Arc::new(RealTimeProvider::default()),
            identity: ExecutionIdentity::default(),
            workflow_execution_id: None,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}

/// Builder for configuring and launching a run, or resuming a paused one.
///
/// `run` and `resume` share the builder so a host re-supplies the same
/// registry, layers and repositories for a resumption.
pub struct WorkflowRunnerBuilder {
    graph: Arc<Graph>,
    user_inputs: HashMap<String, Value>,
    system_vars: SystemVariables,
    environment_vars: HashMap<String, Value>,
    config: EngineConfig,
    registry: Option<Arc<NodeExecutorRegistry>>,
    layers: Vec<Arc<dyn Layer>>,
    pause_repository: Option<Arc<dyn PauseRepository>>,
    form_repository: Option<Arc<dyn FormRepository>>,
    sub_graph_runner: Option<Arc<dyn SubGraphRunner>>,
    id_generator: Arc<dyn IdGenerator>,
    time_provider: Arc<dyn TimeProvider>,
    identity: ExecutionIdentity,
    workflow_execution_id: Option<String>,
    ping_interval: Duration,
}

impl WorkflowRunnerBuilder {
    /// Set user-supplied input variables, read by the root start node.
    pub fn user_inputs(mut self, inputs: HashMap<String, Value>) -> Self {
        self.user_inputs = inputs;
        self
    }

    /// Set system variables (addressable as `sys.*`).
    pub fn system_vars(mut self, vars: SystemVariables) -> Self {
        self.system_vars = vars;
        self
    }

    /// Set environment variables (addressable as `env.*`).
    pub fn environment_vars(mut self, vars: HashMap<String, Value>) -> Self {
        self.environment_vars = vars;
        self
    }

    /// Set the engine configuration (timeouts, max steps, etc.).
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the built-in node executor registry.
    pub fn registry(mut self, registry: Arc<NodeExecutorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Append a layer; layers see events in registration order.
    pub fn layer(mut self, layer: Arc<dyn Layer>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn pause_repository(mut self, repository: Arc<dyn PauseRepository>) -> Self {
        self.pause_repository = Some(repository);
        self
    }

    pub fn form_repository(mut self, repository: Arc<dyn FormRepository>) -> Self {
        self.form_repository = Some(repository);
        self
    }

    /// Set a custom sub-graph runner for iteration/loop nodes.
    pub fn sub_graph_runner(mut self, runner: Arc<dyn SubGraphRunner>) -> Self {
        self.sub_graph_runner = Some(runner);
        self
    }

    pub fn id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    pub fn time_provider(mut self, provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = provider;
        self
    }

    pub fn identity(mut self, identity: ExecutionIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Fix the execution id instead of generating a UUID.
    pub fn workflow_execution_id(mut self, id: impl Into<String>) -> Self {
        self.workflow_execution_id = Some(id.into());
        self
    }

    /// Idle interval after which [`WorkflowHandle::event_stream`] yields a ping.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Start a fresh run from the graph's root.
    pub async fn run(self) -> WorkflowResult<WorkflowHandle> {
        let workflow_execution_id = self
            .workflow_execution_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut system = self.system_vars.clone();
        system
            .workflow_execution_id
            .get_or_insert_with(|| workflow_execution_id.clone());
        let mut pool = VariablePool::with_system(&system);
        let root = self.graph.root_node_id().to_string();
        for (name, value) in &self.user_inputs {
            pool.set(&Selector::new(root.as_str(), name.as_str()), Segment::from_value(value));
        }
        let declared = self
            .graph
            .environment_defaults()
            .iter()
            .filter(|(name, _)| !self.environment_vars.contains_key(name))
            .map(|(name, value)| (name, value));
        for (name, value) in declared.chain(&self.environment_vars) {
            pool.set(
                &Selector::new(ENVIRONMENT_NODE_ID, name.as_str()),
                Segment::from_value(value),
            );
        }

        let state = GraphRuntimeState::new(
            self.graph.clone(),
            pool,
            self.identity.clone(),
            workflow_execution_id.clone(),
            self.time_provider.now(),
        );
        info!(
            workflow_execution_id = %workflow_execution_id,
            nodes = self.graph.node_count(),
            "launching workflow run"
        );
        Ok(self.launch(state, None))
    }

    /// Continue a paused run.
    ///
    /// Loads the pause entity, restores its state over this builder's graph,
    /// re-arms the paused nodes with `payload` and marks the entity resumed.
    /// A pause can be resumed once; a second attempt fails with
    /// [`WorkflowError::AlreadyResumed`].
    pub async fn resume(
        self,
        pause_id: &str,
        payload: ResumePayload,
    ) -> WorkflowResult<WorkflowHandle> {
        let repository = self.pause_repository.clone().ok_or_else(|| {
            WorkflowError::ConfigError("resuming requires a pause repository".to_string())
        })?;
        let entity = repository
            .get(pause_id)
            .await?
            .ok_or_else(|| WorkflowError::PauseNotFound(pause_id.to_string()))?;
        if entity.is_resumed() {
            return Err(WorkflowError::AlreadyResumed(pause_id.to_string()));
        }

        let mut state = GraphRuntimeState::restore(&entity.state, self.graph.clone())?;
        let id_generator = self.id_generator.clone();
        let resumed = state.prepare_resume(&payload, || id_generator.next_id())?;
        repository
            .mark_resumed(pause_id, self.time_provider.now())
            .await?;

        info!(
            workflow_execution_id = %state.workflow_execution_id,
            pause_id,
            resumed_nodes = resumed.len(),
            "resuming workflow run"
        );
        Ok(self.launch(state, Some(pause_id.to_string())))
    }

    fn runtime_context(&self, workflow_execution_id: &str) -> RuntimeContext {
        RuntimeContext {
            time_provider: self.time_provider.clone(),
            id_generator: self.id_generator.clone(),
            config: self.config.clone(),
            workflow_execution_id: workflow_execution_id.to_string(),
            registry: self
                .registry
                .clone()
                .unwrap_or_else(|| Arc::new(NodeExecutorRegistry::new())),
            sub_graph_runner: self.sub_graph_runner.clone(),
            form_repository: self.form_repository.clone(),
            ..Default::default()
        }
    }

    /// Spawn the dispatcher and the task mirroring its events into the log.
    fn launch(self, state: GraphRuntimeState, resumed_from: Option<String>) -> WorkflowHandle {
        let workflow_execution_id = state.workflow_execution_id.clone();
        let context = Arc::new(self.runtime_context(&workflow_execution_id));

        let (command_tx, command_rx) = create_command_channel();
        let (event_tx, mut event_rx) = create_event_channel();
        let (status_tx, status_rx) = watch::channel(ExecutionStatus::Running);
        let events = Arc::new(EventLog::default());

        let mut dispatcher = WorkflowDispatcher::new(state, context)
            .with_layers(self.layers)
            .with_command_receiver(command_rx)
            .with_event_emitter(EventEmitter::new(event_tx));
        if let Some(repository) = self.pause_repository {
            dispatcher = dispatcher.with_pause_repository(repository);
        }
        if let Some(pause_id) = resumed_from {
            dispatcher = dispatcher.resumed_from(pause_id);
        }

        let log = events.clone();
        tokio::spawn(async move {
            let result = {
                let run = dispatcher.run();
                tokio::pin!(run);
                loop {
                    tokio::select! {
                        result = &mut run => break result,
                        Some(event) = event_rx.recv() => log.push(event),
                    }
                }
            };
            // Everything published before `run` returned is already queued.
            while let Ok(event) = event_rx.try_recv() {
                log.push(event);
            }
            log.close();
            status_tx.send_replace(execution_status(result));
        });

        WorkflowHandle::new(
            workflow_execution_id,
            status_rx,
            events,
            command_tx,
            self.ping_interval,
        )
    }
}

fn execution_status(result: WorkflowResult<RunOutcome>) -> ExecutionStatus {
    match result {
        Ok(RunOutcome::Succeeded { outputs }) => ExecutionStatus::Completed(outputs),
        Ok(RunOutcome::PartialSucceeded {
            outputs,
            exceptions_count,
        }) => ExecutionStatus::PartialSucceeded {
            outputs,
            exceptions_count,
        },
        Ok(RunOutcome::Paused { pause_id, details }) => ExecutionStatus::Paused { pause_id, details },
        Err(WorkflowError::Aborted(reason)) => ExecutionStatus::Aborted(reason),
        Err(e) => ExecutionStatus::Failed(e.to_string()),
    }
}
