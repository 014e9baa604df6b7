//! Client-facing view of the engine events.
//!
//! Every engine event maps to at most one `{event, workflow_run_id, ...}`
//! record. An idle stream interleaves `ping` records; the stream ends after
//! `workflow_finished` or `workflow_paused`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use crate::core::event_bus::{EngineEvent, GraphEngineEvent};

pub const EVENT_WORKFLOW_STARTED: &str = "workflow_started";
pub const EVENT_WORKFLOW_FINISHED: &str = "workflow_finished";
pub const EVENT_WORKFLOW_PAUSED: &str = "workflow_paused";
pub const EVENT_NODE_STARTED: &str = "node_started";
pub const EVENT_NODE_FINISHED: &str = "node_finished";
pub const EVENT_NODE_RETRY: &str = "node_retry";
pub const EVENT_NODE_PAUSED: &str = "node_paused";
pub const EVENT_TEXT_CHUNK: &str = "text_chunk";
pub const EVENT_PING: &str = "ping";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamResponse {
    pub event: String,
    pub workflow_run_id: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl StreamResponse {
    pub fn is_terminal(&self) -> bool {
        self.event == EVENT_WORKFLOW_FINISHED || self.event == EVENT_WORKFLOW_PAUSED
    }

    /// One server-sent-events frame.
    pub fn to_sse(&self) -> String {
        let body = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {}\n\n", body)
    }
}

pub struct EventStreamConverter {
    workflow_run_id: String,
    started_at: Option<DateTime<Utc>>,
}

impl EventStreamConverter {
    pub fn new(workflow_run_id: impl Into<String>) -> Self {
        Self {
            workflow_run_id: workflow_run_id.into(),
            started_at: None,
        }
    }

    pub fn ping(&self) -> StreamResponse {
        self.response(EVENT_PING, Map::new())
    }

    fn response(&self, event: &str, data: Map<String, Value>) -> StreamResponse {
        StreamResponse {
            event: event.to_string(),
            workflow_run_id: self.workflow_run_id.clone(),
            data,
        }
    }

    fn elapsed_secs(&self, at: DateTime<Utc>) -> f64 {
        self.started_at
            .map(|s| (at - s).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0)
    }

    fn finished(
        &self,
        at: DateTime<Utc>,
        status: &str,
        outputs: Value,
        error: Option<String>,
        total_tokens: i64,
        total_steps: i32,
        exceptions_count: u32,
    ) -> StreamResponse {
        let data = object(json!({
            "status": status,
            "outputs": outputs,
            "error": error,
            "total_tokens": total_tokens,
            "total_steps": total_steps,
            "exceptions_count": exceptions_count,
            "elapsed_time": self.elapsed_secs(at),
            "finished_at": at.timestamp(),
        }));
        self.response(EVENT_WORKFLOW_FINISHED, data)
    }

    /// Map one engine event; `None` for events with no client-facing form.
    pub fn convert(&mut self, event: &EngineEvent) -> Option<StreamResponse> {
        let at = event.at;
        let response = match &event.event {
            GraphEngineEvent::GraphRunStarted {
                workflow_execution_id,
                resumed_from,
            } => {
                self.started_at.get_or_insert(at);
                self.response(
                    EVENT_WORKFLOW_STARTED,
                    object(json!({
                        "id": workflow_execution_id,
                        "resumed_from": resumed_from,
                        "created_at": at.timestamp(),
                    })),
                )
            }
            GraphEngineEvent::GraphRunSucceeded {
                outputs,
                total_tokens,
                total_steps,
            } => self.finished(at, "succeeded", json!(outputs), None, *total_tokens, *total_steps, 0),
            GraphEngineEvent::GraphRunPartialSucceeded {
                outputs,
                exceptions_count,
                total_tokens,
                total_steps,
            } => self.finished(
                at,
                "partial-succeeded",
                json!(outputs),
                None,
                *total_tokens,
                *total_steps,
                *exceptions_count,
            ),
            GraphEngineEvent::GraphRunFailed {
                error,
                exceptions_count,
                total_tokens,
                total_steps,
            } => self.finished(
                at,
                "failed",
                Value::Null,
                Some(error.clone()),
                *total_tokens,
                *total_steps,
                *exceptions_count,
            ),
            GraphEngineEvent::GraphRunAborted {
                reason,
                outputs,
                total_tokens,
                total_steps,
            } => self.finished(
                at,
                "stopped",
                json!(outputs),
                reason.clone(),
                *total_tokens,
                *total_steps,
                0,
            ),
            GraphEngineEvent::GraphRunPaused {
                pause_id,
                reasons,
                outputs,
                total_tokens,
                total_steps,
            } => self.response(
                EVENT_WORKFLOW_PAUSED,
                object(json!({
                    "pause_id": pause_id,
                    "reasons": reasons,
                    "outputs": outputs,
                    "total_tokens": total_tokens,
                    "total_steps": total_steps,
                    "elapsed_time": self.elapsed_secs(at),
                })),
            ),
            GraphEngineEvent::NodeRunStarted {
                id,
                node_id,
                node_type,
                node_title,
                start_at,
                predecessor_runtime_node_id,
            } => self.response(
                EVENT_NODE_STARTED,
                object(json!({
                    "id": id,
                    "node_id": node_id,
                    "node_type": node_type,
                    "title": node_title,
                    "predecessor_node_id": predecessor_runtime_node_id,
                    "created_at": start_at.timestamp(),
                })),
            ),
            GraphEngineEvent::NodeRunStreamChunk {
                node_id,
                chunk,
                is_final,
                ..
            } => self.response(
                EVENT_TEXT_CHUNK,
                object(json!({
                    "text": chunk,
                    "from_node_id": node_id,
                    "is_final": is_final,
                })),
            ),
            GraphEngineEvent::NodeRunRetry {
                id,
                node_id,
                node_type,
                node_title,
                error,
                retry_index,
                ..
            } => self.response(
                EVENT_NODE_RETRY,
                object(json!({
                    "id": id,
                    "node_id": node_id,
                    "node_type": node_type,
                    "title": node_title,
                    "error": error,
                    "retry_index": retry_index,
                })),
            ),
            GraphEngineEvent::NodeRunSucceeded {
                id,
                node_id,
                node_type,
                node_title,
                start_at,
                node_run_result,
            } => self.node_finished(
                at,
                id,
                node_id,
                node_type.as_str(),
                node_title,
                *start_at,
                "succeeded",
                None,
                node_run_result,
            ),
            GraphEngineEvent::NodeRunFailed {
                id,
                node_id,
                node_type,
                node_title,
                start_at,
                error,
                node_run_result,
            } => self.node_finished(
                at,
                id,
                node_id,
                node_type.as_str(),
                node_title,
                *start_at,
                "failed",
                Some(error),
                node_run_result,
            ),
            GraphEngineEvent::NodeRunException {
                id,
                node_id,
                node_type,
                node_title,
                start_at,
                error,
                node_run_result,
            } => self.node_finished(
                at,
                id,
                node_id,
                node_type.as_str(),
                node_title,
                *start_at,
                "exception",
                Some(error),
                node_run_result,
            ),
            GraphEngineEvent::NodeRunPaused {
                id,
                node_id,
                node_type,
                node_title,
                pause_type,
                ..
            } => self.response(
                EVENT_NODE_PAUSED,
                object(json!({
                    "id": id,
                    "node_id": node_id,
                    "node_type": node_type,
                    "title": node_title,
                    "pause_type": pause_type,
                })),
            ),
        };
        Some(response)
    }

    #[allow(clippy::too_many_arguments)]
    fn node_finished(
        &self,
        at: DateTime<Utc>,
        id: &str,
        node_id: &str,
        node_type: &str,
        title: &str,
        start_at: DateTime<Utc>,
        status: &str,
        error: Option<&String>,
        result: &crate::dsl::schema::NodeRunResult,
    ) -> StreamResponse {
        let elapsed = (at - start_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.response(
            EVENT_NODE_FINISHED,
            object(json!({
                "id": id,
                "node_id": node_id,
                "node_type": node_type,
                "title": title,
                "status": status,
                "inputs": result.inputs,
                "process_data": result.process_data,
                "outputs": result.output_values(),
                "error": error,
                "elapsed_time": elapsed,
                "execution_metadata": {
                    "total_tokens": result.total_tokens(),
                    "retry_index": result.retry_index,
                },
            })),
        )
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Converted engine events with keep-alive pings.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<EngineEvent>,
    converter: EventStreamConverter,
    ping_interval: Duration,
    finished: bool,
}

impl EventStream {
    pub fn new(
        rx: mpsc::UnboundedReceiver<EngineEvent>,
        workflow_run_id: impl Into<String>,
        ping_interval: Duration,
    ) -> Self {
        Self {
            rx,
            converter: EventStreamConverter::new(workflow_run_id),
            ping_interval,
            finished: false,
        }
    }

    /// Next record, a `ping` when nothing arrived within the ping interval,
    /// or `None` once the run's final record was returned.
    pub async fn next(&mut self) -> Option<StreamResponse> {
        loop {
            if self.finished {
                return None;
            }
            match tokio::time::timeout(self.ping_interval, self.rx.recv()).await {
                Err(_) => return Some(self.converter.ping()),
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Ok(Some(event)) => {
                    if let Some(response) = self.converter.convert(&event) {
                        self.finished = response.is_terminal();
                        return Some(response);
                    }
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamResponse> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|response| (response, stream))
        })
    }
}
