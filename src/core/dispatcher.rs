//! The per-run dispatcher.
//!
//! A single task owns [`GraphRuntimeState`] and is the only consumer of the
//! run's event queue. Ready nodes are handed to worker tasks, which report
//! back through the same queue; every mutation of the runtime graph and the
//! variable pool happens here, one event at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;
use futures::FutureExt;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::core::command::CommandReceiver;
use crate::core::coordinator::ExecutionCoordinator;
use crate::core::event_bus::{create_event_channel, EngineEvent, EventEmitter, GraphEngineEvent};
use crate::core::layers::{guarded, Layer};
use crate::core::node_worker::run_node;
use crate::core::pause::{PauseEntity, PauseRepository};
use crate::core::runtime_context::{NodeContext, RuntimeContext};
use crate::core::runtime_state::{GraphRuntimeState, ReadyNode, RuntimeNode};
use crate::domain::model::{PauseDetail, PauseType};
use crate::dsl::schema::{NodeRunResult, NodeType, FAIL_BRANCH_HANDLE};
use crate::error::{WorkflowError, WorkflowResult};
use crate::graph::Graph;

/// How a run that did not fail ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded {
        outputs: HashMap<String, Value>,
    },
    PartialSucceeded {
        outputs: HashMap<String, Value>,
        exceptions_count: u32,
    },
    Paused {
        pause_id: String,
        details: Vec<PauseDetail>,
    },
}

impl RunOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            RunOutcome::Succeeded { .. } => "succeeded",
            RunOutcome::PartialSucceeded { .. } => "partial_succeeded",
            RunOutcome::Paused { .. } => "paused",
        }
    }

    pub fn outputs(&self) -> Option<&HashMap<String, Value>> {
        match self {
            RunOutcome::Succeeded { outputs } | RunOutcome::PartialSucceeded { outputs, .. } => {
                Some(outputs)
            }
            RunOutcome::Paused { .. } => None,
        }
    }
}

pub struct WorkflowDispatcher {
    graph: Arc<Graph>,
    state: GraphRuntimeState,
    context: Arc<RuntimeContext>,
    layers: Vec<Arc<dyn Layer>>,
    coordinator: ExecutionCoordinator,
    event_tx: mpsc::UnboundedSender<EngineEvent>,
    event_rx: mpsc::UnboundedReceiver<EngineEvent>,
    outward: Option<EventEmitter>,
    pause_repository: Option<Arc<dyn PauseRepository>>,
    /// Worker tasks; dropping the dispatcher aborts whatever is still running.
    workers: JoinSet<()>,
    /// Runtime node id -> worker task.
    in_flight: HashMap<String, AbortHandle>,
    resumed_from: Option<String>,
}

impl WorkflowDispatcher {
    pub fn new(mut state: GraphRuntimeState, context: Arc<RuntimeContext>) -> Self {
        let (event_tx, event_rx) = create_event_channel();
        state.call_depth = context.call_depth;
        let coordinator =
            ExecutionCoordinator::new(&context.config, context.cancel_token.clone(), None);
        Self {
            graph: state.graph().clone(),
            state,
            context,
            layers: Vec::new(),
            coordinator,
            event_tx,
            event_rx,
            outward: None,
            pause_repository: None,
            workers: JoinSet::new(),
            in_flight: HashMap::new(),
            resumed_from: None,
        }
    }

    pub fn with_layers(mut self, layers: Vec<Arc<dyn Layer>>) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_command_receiver(mut self, commands: CommandReceiver) -> Self {
        self.coordinator = ExecutionCoordinator::new(
            &self.context.config,
            self.context.cancel_token.clone(),
            Some(commands),
        );
        self
    }

    /// Forward every published event to `emitter` after the layers saw it.
    pub fn with_event_emitter(mut self, emitter: EventEmitter) -> Self {
        self.outward = Some(emitter);
        self
    }

    pub fn with_pause_repository(mut self, repository: Arc<dyn PauseRepository>) -> Self {
        self.pause_repository = Some(repository);
        self
    }

    pub fn resumed_from(mut self, pause_id: impl Into<String>) -> Self {
        self.resumed_from = Some(pause_id.into());
        self
    }

    pub fn state(&self) -> &GraphRuntimeState {
        &self.state
    }

    pub fn into_state(self) -> GraphRuntimeState {
        self.state
    }

    /// Drive the run to a terminal state.
    ///
    /// A terminal graph event is always published and every layer's
    /// `on_graph_end` is always called, whatever the outcome.
    pub async fn run(&mut self) -> WorkflowResult<RunOutcome> {
        let result = self.execute().await;

        let terminal = self.terminal_event(&result);
        self.publish(terminal).await;

        let error = result.as_ref().err();
        for layer in &self.layers {
            if let Err(e) = guarded(layer.on_graph_end(&self.state, error)).await {
                warn!(layer = layer.name(), error = %e, "layer on_graph_end failed");
            }
        }

        match &result {
            Ok(outcome) => info!(
                workflow_execution_id = %self.state.workflow_execution_id,
                status = outcome.status(),
                steps = self.state.node_run_steps(),
                "workflow run finished"
            ),
            Err(e) => warn!(
                workflow_execution_id = %self.state.workflow_execution_id,
                error = %e,
                "workflow run failed"
            ),
        }
        result
    }

    async fn execute(&mut self) -> WorkflowResult<RunOutcome> {
        let config = self.context.config.clone();
        if self.context.call_depth > config.max_call_depth {
            return Err(WorkflowError::MaxCallDepthExceeded {
                depth: self.context.call_depth,
                max: config.max_call_depth,
            });
        }

        self.start_layers().await?;
        self.publish(GraphEngineEvent::GraphRunStarted {
            workflow_execution_id: self.state.workflow_execution_id.clone(),
            resumed_from: self.resumed_from.clone(),
        })
        .await;
        info!(
            workflow_execution_id = %self.state.workflow_execution_id,
            root = %self.graph.root_node_id(),
            call_depth = self.context.call_depth,
            resumed = self.resumed_from.is_some(),
            "workflow run started"
        );

        let started = Instant::now();
        let max_time = Duration::from_secs(config.max_execution_time_secs);
        let idle = Duration::from_millis(config.idle_timeout_ms.max(1));

        loop {
            self.apply_commands();
            self.schedule_ready().await;

            if self
                .coordinator
                .is_execution_complete(self.state.ready_queue.len(), self.in_flight.len())
            {
                self.coordinator.mark_complete();
                break;
            }

            let received = tokio::time::timeout(idle, self.event_rx.recv()).await;
            self.reap_workers();
            match received {
                Ok(Some(event)) => {
                    if let Some(event) = self.handle_event(event) {
                        self.publish_event(event).await;
                    }
                    self.apply_commands();
                }
                Ok(None) => {
                    // Unreachable while we hold `event_tx`.
                    self.coordinator
                        .record_failure(WorkflowError::InternalError("event queue closed".into()));
                }
                Err(_) => {
                    self.apply_commands();
                    self.coordinator
                        .check_scaling(self.state.ready_queue.len(), self.in_flight.len());
                }
            }

            if started.elapsed() > max_time && !self.coordinator.has_failed() {
                self.coordinator.record_failure(WorkflowError::ExecutionTimeout);
                self.abort_in_flight("workflow execution timed out");
            }
        }

        // Aborted workers are gone, and finished ones have exited, before the
        // outcome is reported.
        self.workers.shutdown().await;
        self.finalize().await
    }

    async fn start_layers(&self) -> WorkflowResult<()> {
        for layer in &self.layers {
            if let Err(e) = guarded(layer.on_graph_start(&self.state)).await {
                if layer.is_mandatory() {
                    error!(layer = layer.name(), error = %e, "mandatory layer failed to start");
                    return Err(WorkflowError::LayerInitializationError {
                        layer: layer.name().to_string(),
                        message: e.to_string(),
                    });
                }
                warn!(layer = layer.name(), error = %e, "optional layer failed to start");
            }
        }
        Ok(())
    }

    fn apply_commands(&mut self) {
        for update in self.coordinator.check_commands() {
            debug!(selector = %update.selector, "variable updated by command");
            self.state.variable_pool.set(&update.selector, update.value);
        }
    }

    async fn schedule_ready(&mut self) {
        while self.coordinator.should_schedule()
            && self.coordinator.has_capacity(self.in_flight.len())
        {
            let Some(ready) = self.state.ready_queue.pop_front() else {
                break;
            };
            let max_steps = self.context.config.max_steps;
            if self.state.increment_steps() > max_steps {
                self.state.ready_queue.push_front(ready);
                self.coordinator
                    .record_failure(WorkflowError::MaxStepsExceeded(max_steps));
                break;
            }
            if let Err(e) = self.start_node(ready).await {
                self.coordinator.record_failure(e);
                break;
            }
        }
    }

    async fn start_node(&mut self, ready: ReadyNode) -> WorkflowResult<()> {
        let node = self
            .graph
            .node(&ready.node_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NodeNotFound(ready.node_id.clone()))?;

        let runtime_id = match ready.runtime_node_id {
            Some(id) => id,
            None => self.state.runtime_graph.add_runtime_node(RuntimeNode::new(
                self.context.id_generator.next_id(),
                &node,
            )),
        };
        let start_at = self.context.time_provider.now();
        self.state.runtime_graph.mark_running(&runtime_id, start_at)?;
        let predecessor = self
            .state
            .runtime_graph
            .get(&runtime_id)
            .and_then(|n| n.predecessor_runtime_node_id.clone());

        debug!(node_id = %node.id, runtime_node_id = %runtime_id, node_type = %node.node_type, "scheduling node");
        self.publish(GraphEngineEvent::NodeRunStarted {
            id: runtime_id.clone(),
            node_id: node.id.clone(),
            node_type: node.node_type,
            node_title: node.title.clone(),
            start_at,
            predecessor_runtime_node_id: predecessor,
        })
        .await;

        let emitter = EventEmitter::new(self.event_tx.clone());
        let ctx = NodeContext::new(
            self.context.clone(),
            runtime_id.clone(),
            node.id.clone(),
            node.node_type,
            node.title.clone(),
            emitter.clone(),
        );
        let pool = self.state.variable_pool.clone();
        let handle = self
            .workers
            .spawn(run_node(node, pool, ctx, start_at, emitter));
        self.in_flight.insert(runtime_id, handle);
        Ok(())
    }

    /// Collect worker tasks that already exited.
    fn reap_workers(&mut self) {
        while let Some(Some(joined)) = self.workers.join_next().now_or_never() {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    error!(error = %e, "node worker task ended abnormally");
                }
            }
        }
    }

    /// Apply one event to the run state.
    ///
    /// Returns the event to publish; an exception without a usable
    /// fail-branch edge is published as a failure. Terminal events of
    /// workers that were already given up on are dropped.
    fn handle_event(&mut self, event: EngineEvent) -> Option<EngineEvent> {
        if event.event.is_node_terminal() {
            let runtime_id = event.event.runtime_node_id().unwrap_or_default();
            if self.in_flight.remove(runtime_id).is_none() {
                debug!(runtime_node_id = %runtime_id, "ignoring event of abandoned node");
                return None;
            }
        }

        let now = self.context.time_provider.now();
        let at = event.at;
        let outcome = match event.event {
            GraphEngineEvent::NodeRunSucceeded {
                ref id,
                ref node_id,
                node_type,
                ref node_run_result,
                ..
            } => self
                .on_node_succeeded(id, node_id, node_type, node_run_result, now)
                .map(|_| event.event),
            GraphEngineEvent::NodeRunException {
                id,
                node_id,
                node_type,
                node_title,
                start_at,
                error,
                node_run_result,
            } => {
                let recoverable = node_run_result.edge_source_handle != FAIL_BRANCH_HANDLE
                    || self.graph.has_edge_with_handle(&node_id, FAIL_BRANCH_HANDLE);
                if recoverable {
                    self.on_node_exception(&id, &node_id, &error, &node_run_result, now)
                        .map(|_| GraphEngineEvent::NodeRunException {
                            id,
                            node_id,
                            node_type,
                            node_title,
                            start_at,
                            error,
                            node_run_result,
                        })
                } else {
                    warn!(node_id = %node_id, "fail-branch strategy without a fail-branch edge");
                    self.on_node_failed(&id, &node_id, &error, &node_run_result, now)
                        .map(|_| GraphEngineEvent::NodeRunFailed {
                            id,
                            node_id,
                            node_type,
                            node_title,
                            start_at,
                            error,
                            node_run_result,
                        })
                }
            }
            GraphEngineEvent::NodeRunFailed {
                ref id,
                ref node_id,
                ref error,
                ref node_run_result,
                ..
            } => self
                .on_node_failed(id, node_id, error, node_run_result, now)
                .map(|_| event.event),
            GraphEngineEvent::NodeRunPaused {
                ref id,
                ref node_id,
                ref pause_type,
                ref node_run_result,
                ..
            } => self
                .on_node_paused(id, node_id, pause_type, node_run_result, now)
                .map(|_| event.event),
            other => Ok(other),
        };

        match outcome {
            Ok(event) => Some(EngineEvent { at, event }),
            Err(e) => {
                error!(error = %e, "failed to apply node event");
                self.coordinator.record_failure(e);
                None
            }
        }
    }

    fn on_node_succeeded(
        &mut self,
        runtime_id: &str,
        node_id: &str,
        node_type: NodeType,
        result: &NodeRunResult,
        now: chrono::DateTime<chrono::Utc>,
    ) -> WorkflowResult<()> {
        self.state
            .runtime_graph
            .mark_succeeded(runtime_id, result.clone(), now)?;
        self.state
            .variable_pool
            .set_node_outputs(node_id, &result.outputs);
        if matches!(node_type, NodeType::End | NodeType::Answer) {
            self.state.outputs.extend(result.output_values());
        }
        self.state.add_tokens(result.total_tokens());
        self.advance(node_id, &result.edge_source_handle);
        Ok(())
    }

    fn on_node_exception(
        &mut self,
        runtime_id: &str,
        node_id: &str,
        error: &str,
        result: &NodeRunResult,
        now: chrono::DateTime<chrono::Utc>,
    ) -> WorkflowResult<()> {
        self.state.record_exception();
        self.state
            .runtime_graph
            .mark_failed(runtime_id, error, Some(result.clone()), now)?;
        self.state
            .variable_pool
            .set_node_outputs(node_id, &result.outputs);
        self.state.add_tokens(result.total_tokens());
        info!(node_id = %node_id, handle = %result.edge_source_handle, "node exception handled by error strategy");
        self.advance(node_id, &result.edge_source_handle);
        Ok(())
    }

    fn on_node_failed(
        &mut self,
        runtime_id: &str,
        node_id: &str,
        error: &str,
        result: &NodeRunResult,
        now: chrono::DateTime<chrono::Utc>,
    ) -> WorkflowResult<()> {
        self.state
            .runtime_graph
            .mark_failed(runtime_id, error, Some(result.clone()), now)?;
        self.coordinator
            .record_failure(WorkflowError::NodeExecutionError {
                node_id: node_id.to_string(),
                error: error.to_string(),
                error_detail: result.error_detail.clone(),
            });
        Ok(())
    }

    fn on_node_paused(
        &mut self,
        runtime_id: &str,
        node_id: &str,
        pause_type: &PauseType,
        result: &NodeRunResult,
        now: chrono::DateTime<chrono::Utc>,
    ) -> WorkflowResult<()> {
        let paused_by = match pause_type {
            PauseType::HumanInputPause { .. } => "human",
            PauseType::SchedulingPause {} => "system",
        };
        self.state
            .runtime_graph
            .mark_paused(runtime_id, paused_by, result.clone(), now)?;
        self.state.pause_details.push(PauseDetail {
            node_id: Some(node_id.to_string()),
            runtime_node_id: Some(runtime_id.to_string()),
            pause_type: pause_type.clone(),
            paused_at: now,
        });
        info!(node_id = %node_id, runtime_node_id = %runtime_id, "node paused");
        Ok(())
    }

    fn advance(&mut self, node_id: &str, handle: &str) {
        let ready = self.state.traversal.complete_node(&self.graph, node_id, handle);
        for next in ready {
            debug!(from = %node_id, to = %next, handle = %handle, "node ready");
            self.state.ready_queue.push_back(ReadyNode::new(next));
        }
    }

    /// Give up on every in-flight worker; used when the run deadline passes.
    fn abort_in_flight(&mut self, reason: &str) {
        let now = self.context.time_provider.now();
        for (runtime_id, handle) in self.in_flight.drain() {
            handle.abort();
            if let Err(e) = self
                .state
                .runtime_graph
                .mark_failed(&runtime_id, reason, None, now)
            {
                warn!(runtime_node_id = %runtime_id, error = %e, "could not mark aborted node");
            }
        }
    }

    async fn finalize(&mut self) -> WorkflowResult<RunOutcome> {
        if self.coordinator.is_aborted() {
            let reason = self
                .coordinator
                .abort_reason()
                .unwrap_or("aborted by command")
                .to_string();
            return Err(WorkflowError::Aborted(reason));
        }
        if let Some(err) = self.coordinator.take_failure() {
            return Err(err);
        }

        if self.coordinator.is_pause_requested() && !self.state.ready_queue.is_empty() {
            let now = self.context.time_provider.now();
            self.state.pause_details.push(PauseDetail::scheduling(now));
        }
        if !self.state.pause_details.is_empty() {
            return self.persist_pause().await;
        }

        let outputs = self.state.outputs.clone();
        match self.state.exceptions_count() {
            0 => Ok(RunOutcome::Succeeded { outputs }),
            exceptions_count => Ok(RunOutcome::PartialSucceeded {
                outputs,
                exceptions_count,
            }),
        }
    }

    /// Capture the state durably. A pause that cannot be stored fails the
    /// run instead of reporting "paused".
    async fn persist_pause(&mut self) -> WorkflowResult<RunOutcome> {
        let repository = self.pause_repository.clone().ok_or_else(|| {
            WorkflowError::PauseRepositoryError("no pause repository configured".to_string())
        })?;
        let details = self.state.pause_details.clone();
        let state = self.state.snapshot()?;
        let entity = PauseEntity::new(
            self.context.id_generator.next_id(),
            self.state.workflow_execution_id.clone(),
            state,
            details.clone(),
            self.context.time_provider.now(),
        );
        let pause_id = repository.create(entity).await?;
        info!(pause_id = %pause_id, reasons = details.len(), "workflow paused");
        Ok(RunOutcome::Paused { pause_id, details })
    }

    fn terminal_event(&self, result: &WorkflowResult<RunOutcome>) -> GraphEngineEvent {
        let total_tokens = self.state.total_tokens();
        let total_steps = self.state.node_run_steps();
        match result {
            Ok(RunOutcome::Succeeded { outputs }) => GraphEngineEvent::GraphRunSucceeded {
                outputs: outputs.clone(),
                total_tokens,
                total_steps,
            },
            Ok(RunOutcome::PartialSucceeded {
                outputs,
                exceptions_count,
            }) => GraphEngineEvent::GraphRunPartialSucceeded {
                outputs: outputs.clone(),
                exceptions_count: *exceptions_count,
                total_tokens,
                total_steps,
            },
            Ok(RunOutcome::Paused { pause_id, details }) => GraphEngineEvent::GraphRunPaused {
                pause_id: pause_id.clone(),
                reasons: details.clone(),
                outputs: self.state.outputs.clone(),
                total_tokens,
                total_steps,
            },
            Err(WorkflowError::Aborted(reason)) => GraphEngineEvent::GraphRunAborted {
                reason: Some(reason.clone()),
                outputs: self.state.outputs.clone(),
                total_tokens,
                total_steps,
            },
            Err(e) => GraphEngineEvent::GraphRunFailed {
                error: e.to_string(),
                exceptions_count: self.state.exceptions_count(),
                total_tokens,
                total_steps,
            },
        }
    }

    async fn publish(&self, event: GraphEngineEvent) {
        self.publish_event(EngineEvent::new(event)).await;
    }

    /// Layers first, in registration order, then the outward stream.
    async fn publish_event(&self, event: EngineEvent) {
        for layer in &self.layers {
            if let Err(e) = guarded(layer.on_event(&event, &self.state)).await {
                warn!(layer = layer.name(), event = event.event.name(), error = %e, "layer failed on event, skipped");
            }
        }
        if let Some(outward) = &self.outward {
            outward.emit_event(event);
        }
    }
}
