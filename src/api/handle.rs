use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::core::command::{Command, CommandSender};
use crate::core::event_bus::{EngineEvent, GraphEngineEvent};
use crate::core::event_stream::EventStream;
use crate::domain::execution::ExecutionStatus;
use crate::error::{WorkflowError, WorkflowResult};

/// Every event a run published, plus live subscribers.
#[derive(Default)]
pub(crate) struct EventLog {
    inner: Mutex<EventLogInner>,
}

#[derive(Default)]
struct EventLogInner {
    events: Vec<EngineEvent>,
    subscribers: Vec<mpsc::UnboundedSender<EngineEvent>>,
    closed: bool,
}

impl EventLog {
    pub(crate) fn push(&self, event: EngineEvent) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        inner.events.push(event);
    }

    /// Drop every subscriber; their receivers end after the buffered events.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    /// A receiver that replays the history, then follows the run.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        for event in &inner.events {
            let _ = tx.send(event.clone());
        }
        if !inner.closed {
            inner.subscribers.push(tx);
        }
        rx
    }

    fn snapshot(&self) -> Vec<GraphEngineEvent> {
        self.inner.lock().events.iter().map(|e| e.event.clone()).collect()
    }
}

/// Control and observation handle of one launched run.
pub struct WorkflowHandle {
    workflow_execution_id: String,
    status_rx: watch::Receiver<ExecutionStatus>,
    events: Arc<EventLog>,
    command_tx: CommandSender,
    ping_interval: Duration,
}

impl WorkflowHandle {
    pub(crate) fn new(
        workflow_execution_id: String,
        status_rx: watch::Receiver<ExecutionStatus>,
        events: Arc<EventLog>,
        command_tx: CommandSender,
        ping_interval: Duration,
    ) -> Self {
        Self {
            workflow_execution_id,
            status_rx,
            events,
            command_tx,
            ping_interval,
        }
    }

    pub fn workflow_execution_id(&self) -> &str {
        &self.workflow_execution_id
    }

    /// Return the current execution status (non-blocking).
    pub fn status(&self) -> ExecutionStatus {
        self.status_rx.borrow().clone()
    }

    /// Return a snapshot of all engine events published so far.
    pub fn events(&self) -> Vec<GraphEngineEvent> {
        self.events.snapshot()
    }

    /// Raw engine events, replayed from the start of the run.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Client-facing records (`workflow_started`, `node_finished`, ...) with
    /// keep-alive pings; ends after the run's final record.
    pub fn event_stream(&self) -> EventStream {
        EventStream::new(
            self.events.subscribe(),
            self.workflow_execution_id.clone(),
            self.ping_interval,
        )
    }

    /// Block until the run leaves `Running`.
    pub async fn wait(&self) -> ExecutionStatus {
        let mut rx = self.status_rx.clone();
        loop {
            let status = rx.borrow().clone();
            match status {
                ExecutionStatus::Running => {
                    if rx.changed().await.is_err() {
                        return rx.borrow().clone();
                    }
                }
                _ => return status,
            }
        }
    }

    /// Stop scheduling and cancel in-flight nodes cooperatively.
    pub async fn abort(&self, reason: Option<String>) -> WorkflowResult<()> {
        self.send(Command::Abort { reason }).await
    }

    /// Stop scheduling and persist a pause once in-flight nodes settle.
    pub async fn pause(&self) -> WorkflowResult<()> {
        self.send(Command::Pause).await
    }

    /// Write values into the pool; keys are `"node_id.variable"`.
    pub async fn update_variables(&self, variables: HashMap<String, Value>) -> WorkflowResult<()> {
        self.send(Command::UpdateVariables { variables }).await
    }

    async fn send(&self, command: Command) -> WorkflowResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| WorkflowError::InternalError("Workflow already terminated".to_string()))
    }
}
