use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::model::{PauseDetail, PauseType};
use crate::dsl::schema::{NodeRunResult, NodeType};

/// Facts emitted while a graph runs.
///
/// Node events are produced by workers and flow through the dispatcher's
/// single queue; graph events are produced by the dispatcher itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEngineEvent {
    GraphRunStarted {
        workflow_execution_id: String,
        resumed_from: Option<String>,
    },
    GraphRunSucceeded {
        outputs: HashMap<String, Value>,
        total_tokens: i64,
        total_steps: i32,
    },
    GraphRunPartialSucceeded {
        outputs: HashMap<String, Value>,
        exceptions_count: u32,
        total_tokens: i64,
        total_steps: i32,
    },
    GraphRunFailed {
        error: String,
        exceptions_count: u32,
        total_tokens: i64,
        total_steps: i32,
    },
    GraphRunAborted {
        reason: Option<String>,
        outputs: HashMap<String, Value>,
        total_tokens: i64,
        total_steps: i32,
    },
    GraphRunPaused {
        pause_id: String,
        reasons: Vec<PauseDetail>,
        outputs: HashMap<String, Value>,
        total_tokens: i64,
        total_steps: i32,
    },

    NodeRunStarted {
        id: String,
        node_id: String,
        node_type: NodeType,
        node_title: String,
        start_at: DateTime<Utc>,
        predecessor_runtime_node_id: Option<String>,
    },
    NodeRunStreamChunk {
        id: String,
        node_id: String,
        node_type: NodeType,
        chunk: String,
        is_final: bool,
    },
    NodeRunRetry {
        id: String,
        node_id: String,
        node_type: NodeType,
        node_title: String,
        start_at: DateTime<Utc>,
        error: String,
        retry_index: i32,
    },
    NodeRunSucceeded {
        id: String,
        node_id: String,
        node_type: NodeType,
        node_title: String,
        start_at: DateTime<Utc>,
        node_run_result: NodeRunResult,
    },
    NodeRunFailed {
        id: String,
        node_id: String,
        node_type: NodeType,
        node_title: String,
        start_at: DateTime<Utc>,
        error: String,
        node_run_result: NodeRunResult,
    },
    NodeRunException {
        id: String,
        node_id: String,
        node_type: NodeType,
        node_title: String,
        start_at: DateTime<Utc>,
        error: String,
        node_run_result: NodeRunResult,
    },
    NodeRunPaused {
        id: String,
        node_id: String,
        node_type: NodeType,
        node_title: String,
        start_at: DateTime<Utc>,
        pause_type: PauseType,
        node_run_result: NodeRunResult,
    },
}

impl GraphEngineEvent {
    /// Snake_case name of the variant.
    pub fn name(&self) -> &'static str {
        match self {
            GraphEngineEvent::GraphRunStarted { .. } => "graph_run_started",
            GraphEngineEvent::GraphRunSucceeded { .. } => "graph_run_succeeded",
            GraphEngineEvent::GraphRunPartialSucceeded { .. } => "graph_run_partial_succeeded",
            GraphEngineEvent::GraphRunFailed { .. } => "graph_run_failed",
            GraphEngineEvent::GraphRunAborted { .. } => "graph_run_aborted",
            GraphEngineEvent::GraphRunPaused { .. } => "graph_run_paused",
            GraphEngineEvent::NodeRunStarted { .. } => "node_run_started",
            GraphEngineEvent::NodeRunStreamChunk { .. } => "node_run_stream_chunk",
            GraphEngineEvent::NodeRunRetry { .. } => "node_run_retry",
            GraphEngineEvent::NodeRunSucceeded { .. } => "node_run_succeeded",
            GraphEngineEvent::NodeRunFailed { .. } => "node_run_failed",
            GraphEngineEvent::NodeRunException { .. } => "node_run_exception",
            GraphEngineEvent::NodeRunPaused { .. } => "node_run_paused",
        }
    }

    /// Graph node id for node events.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            GraphEngineEvent::NodeRunStarted { node_id, .. }
            | GraphEngineEvent::NodeRunStreamChunk { node_id, .. }
            | GraphEngineEvent::NodeRunRetry { node_id, .. }
            | GraphEngineEvent::NodeRunSucceeded { node_id, .. }
            | GraphEngineEvent::NodeRunFailed { node_id, .. }
            | GraphEngineEvent::NodeRunException { node_id, .. }
            | GraphEngineEvent::NodeRunPaused { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// Runtime node id for node events.
    pub fn runtime_node_id(&self) -> Option<&str> {
        match self {
            GraphEngineEvent::NodeRunStarted { id, .. }
            | GraphEngineEvent::NodeRunStreamChunk { id, .. }
            | GraphEngineEvent::NodeRunRetry { id, .. }
            | GraphEngineEvent::NodeRunSucceeded { id, .. }
            | GraphEngineEvent::NodeRunFailed { id, .. }
            | GraphEngineEvent::NodeRunException { id, .. }
            | GraphEngineEvent::NodeRunPaused { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Terminal events of a single node invocation.
    pub fn is_node_terminal(&self) -> bool {
        matches!(
            self,
            GraphEngineEvent::NodeRunSucceeded { .. }
                | GraphEngineEvent::NodeRunFailed { .. }
                | GraphEngineEvent::NodeRunException { .. }
                | GraphEngineEvent::NodeRunPaused { .. }
        )
    }

    /// Terminal events of a whole run.
    pub fn is_graph_terminal(&self) -> bool {
        matches!(
            self,
            GraphEngineEvent::GraphRunSucceeded { .. }
                | GraphEngineEvent::GraphRunPartialSucceeded { .. }
                | GraphEngineEvent::GraphRunFailed { .. }
                | GraphEngineEvent::GraphRunAborted { .. }
                | GraphEngineEvent::GraphRunPaused { .. }
        )
    }
}

/// A timestamped engine event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: GraphEngineEvent,
}

impl EngineEvent {
    pub fn new(event: GraphEngineEvent) -> Self {
        Self {
            at: Utc::now(),
            event,
        }
    }
}

/// Sender wrapper for engine events, with an atomic active flag so that event
/// emission can be cheaply skipped when no listener is attached.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<EngineEvent>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            tx,
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn with_active_flag(tx: mpsc::UnboundedSender<EngineEvent>, active: Arc<AtomicBool>) -> Self {
        Self { tx, active }
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Returns `false` when the event was dropped (inactive or closed).
    pub fn emit(&self, event: GraphEngineEvent) -> bool {
        self.emit_event(EngineEvent::new(event))
    }

    pub fn emit_event(&self, event: EngineEvent) -> bool {
        self.is_active() && self.tx.send(event).is_ok()
    }
}

/// Create an unbounded engine event channel.
pub fn create_event_channel() -> (
    mpsc::UnboundedSender<EngineEvent>,
    mpsc::UnboundedReceiver<EngineEvent>,
) {
    mpsc::unbounded_channel()
}
