use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use super::{Layer, LayerError};
use crate::core::runtime_state::GraphRuntimeState;
use crate::error::WorkflowError;

/// Outcome of one run, as written to a trigger log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerLogRecord {
    pub workflow_execution_id: String,
    pub workflow_id: String,
    pub app_id: String,
    pub tenant_id: String,
    pub invoke_from: String,
    pub status: String,
    pub error: Option<String>,
    pub outputs: HashMap<String, Value>,
    pub total_tokens: i64,
    pub total_steps: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[async_trait]
pub trait TriggerLogSink: Send + Sync {
    async fn write(&self, record: TriggerLogRecord) -> Result<(), LayerError>;
}

#[derive(Default)]
pub struct MemoryTriggerLogSink {
    records: Mutex<Vec<TriggerLogRecord>>,
}

impl MemoryTriggerLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TriggerLogRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl TriggerLogSink for MemoryTriggerLogSink {
    async fn write(&self, record: TriggerLogRecord) -> Result<(), LayerError> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Writes the run outcome to a [`TriggerLogSink`] when the run ends.
pub struct TriggerLogLayer {
    sink: Arc<dyn TriggerLogSink>,
}

impl TriggerLogLayer {
    pub fn new(sink: Arc<dyn TriggerLogSink>) -> Self {
        Self { sink }
    }
}

fn run_status(state: &GraphRuntimeState, error: Option<&WorkflowError>) -> &'static str {
    match error {
        Some(e) => e.kind(),
        None if !state.pause_details.is_empty() => "paused",
        None if state.exceptions_count() > 0 => "partial_succeeded",
        None => "succeeded",
    }
}

#[async_trait]
impl Layer for TriggerLogLayer {
    fn name(&self) -> &str {
        "trigger_log"
    }

    async fn on_graph_end(
        &self,
        state: &GraphRuntimeState,
        error: Option<&WorkflowError>,
    ) -> Result<(), LayerError> {
        let record = TriggerLogRecord {
            workflow_execution_id: state.workflow_execution_id.clone(),
            workflow_id: state.identity.workflow_id.clone(),
            app_id: state.identity.app_id.clone(),
            tenant_id: state.identity.tenant_id.clone(),
            invoke_from: state.identity.invoke_from.clone(),
            status: run_status(state, error).to_string(),
            error: error.map(|e| e.to_string()),
            outputs: state.outputs.clone(),
            total_tokens: state.total_tokens(),
            total_steps: state.node_run_steps(),
            started_at: state.start_at,
            finished_at: Utc::now(),
        };
        self.sink.write(record).await
    }
}
