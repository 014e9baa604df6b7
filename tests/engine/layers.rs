use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use flowgraph::{
    EngineEvent, ExecutionStatus, GraphRuntimeState, InMemorySandboxRegistry, Layer, LayerError,
    MemoryTriggerLogSink, SandboxLayer, TracingLayer, TriggerLogLayer, WorkflowError,
    WorkflowRunner,
};

use super::helpers::{finish, graph, labels, registry_with, ScriptedCode};

const LINEAR_WORKFLOW: &str = r#"
version: "0.1.0"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: render
    data: { type: template-transform, title: Render, template: "done" }
  - id: end
    data:
      type: end
      title: End
      outputs:
        - { variable: text, value_selector: ["render", "output"] }
edges:
  - { source: start, target: render }
  - { source: render, target: end }
"#;

/// Records every hook call; optionally fails every `on_event`.
#[derive(Default)]
struct RecordingLayer {
    fail_events: bool,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Layer for RecordingLayer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_graph_start(&self, _state: &GraphRuntimeState) -> Result<(), LayerError> {
        self.calls.lock().push("start".to_string());
        Ok(())
    }

    async fn on_event(
        &self,
        event: &EngineEvent,
        _state: &GraphRuntimeState,
    ) -> Result<(), LayerError> {
        self.calls.lock().push(event.event.name().to_string());
        if self.fail_events {
            return Err(LayerError::Event("unavailable".to_string()));
        }
        Ok(())
    }

    async fn on_graph_end(
        &self,
        _state: &GraphRuntimeState,
        error: Option<&WorkflowError>,
    ) -> Result<(), LayerError> {
        let call = match error {
            Some(_) => "end:error",
            None => "end:ok",
        };
        self.calls.lock().push(call.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_failing_event_hook_does_not_affect_run() {
    let failing = Arc::new(RecordingLayer {
        fail_events: true,
        ..Default::default()
    });
    let observer = Arc::new(RecordingLayer::default());

    let handle = WorkflowRunner::builder(graph(LINEAR_WORKFLOW))
        .layer(failing.clone())
        .layer(observer.clone())
        .layer(Arc::new(TracingLayer))
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    assert!(matches!(status, ExecutionStatus::Completed(_)));
    let calls = observer.calls.lock().clone();
    assert_eq!(calls.first().map(String::as_str), Some("start"));
    assert_eq!(calls.last().map(String::as_str), Some("end:ok"));
    // Layers see exactly what the outward stream sees, in order.
    let seen: Vec<&str> = calls[1..calls.len() - 1].iter().map(String::as_str).collect();
    let published: Vec<&str> = events.iter().map(|e| e.name()).collect();
    assert_eq!(seen, published);
    assert_eq!(failing.calls.lock().len(), calls.len());
}

#[tokio::test]
async fn test_mandatory_layer_failure_stops_run_before_nodes() {
    let observer = Arc::new(RecordingLayer::default());
    let handle = WorkflowRunner::builder(graph(LINEAR_WORKFLOW))
        .layer(Arc::new(SandboxLayer::new(Arc::new(
            InMemorySandboxRegistry::new(0),
        ))))
        .layer(observer.clone())
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    match status {
        ExecutionStatus::Failed(error) => {
            assert!(error.starts_with("Layer 'sandbox' failed to initialize"), "{}", error)
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(labels(&events), vec!["GraphFailed"]);
    assert_eq!(
        observer.calls.lock().clone(),
        vec!["graph_run_failed".to_string(), "end:error".to_string()]
    );
}

#[tokio::test]
async fn test_optional_sandbox_and_release() {
    let handle = WorkflowRunner::builder(graph(LINEAR_WORKFLOW))
        .layer(Arc::new(
            SandboxLayer::new(Arc::new(InMemorySandboxRegistry::new(0))).optional(),
        ))
        .run()
        .await
        .unwrap();
    let (status, _) = finish(&handle).await;
    assert!(matches!(status, ExecutionStatus::Completed(_)));

    let registry = Arc::new(InMemorySandboxRegistry::new(1));
    let handle = WorkflowRunner::builder(graph(LINEAR_WORKFLOW))
        .layer(Arc::new(SandboxLayer::new(registry.clone())))
        .run()
        .await
        .unwrap();
    let (status, _) = finish(&handle).await;
    assert!(matches!(status, ExecutionStatus::Completed(_)));
    assert_eq!(registry.active_count(), 0);
}

#[tokio::test]
async fn test_trigger_log_records_outcome() {
    let sink = Arc::new(MemoryTriggerLogSink::new());
    let handle = WorkflowRunner::builder(graph(LINEAR_WORKFLOW))
        .layer(Arc::new(TriggerLogLayer::new(sink.clone())))
        .workflow_execution_id("exec-log")
        .run()
        .await
        .unwrap();
    finish(&handle).await;

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].workflow_execution_id, "exec-log");
    assert_eq!(records[0].status, "succeeded");
    assert_eq!(records[0].total_steps, 3);
    assert_eq!(records[0].outputs.get("text"), Some(&serde_json::json!("done")));
    assert!(records[0].error.is_none());

    let failing = LINEAR_WORKFLOW.replace(
        "{ type: template-transform, title: Render, template: \"done\" }",
        "{ type: code, title: Render, code: \"fail\" }",
    );
    let sink = Arc::new(MemoryTriggerLogSink::new());
    let handle = WorkflowRunner::builder(graph(&failing))
        .registry(registry_with(ScriptedCode::new()))
        .layer(Arc::new(TriggerLogLayer::new(sink.clone())))
        .run()
        .await
        .unwrap();
    finish(&handle).await;

    let records = sink.records();
    assert_eq!(records[0].status, "node_execution");
    assert!(records[0].error.as_deref().unwrap_or_default().contains("node=render"));
}

/// Panics on every node start.
struct PanickingLayer;

#[async_trait]
impl Layer for PanickingLayer {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn on_event(
        &self,
        event: &EngineEvent,
        _state: &GraphRuntimeState,
    ) -> Result<(), LayerError> {
        if event.event.name() == "node_run_started" {
            panic!("observer bug");
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_panicking_layer_is_isolated() {
    let observer = Arc::new(RecordingLayer::default());
    let handle = WorkflowRunner::builder(graph(LINEAR_WORKFLOW))
        .layer(Arc::new(PanickingLayer))
        .layer(observer.clone())
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    let ExecutionStatus::Completed(outputs) = status else {
        panic!("expected completion, got {:?}", status);
    };
    assert_eq!(outputs.get("text"), Some(&serde_json::json!("done")));
    assert_eq!(labels(&events).last().map(String::as_str), Some("GraphSucceeded"));
    assert_eq!(observer.calls.lock().last().map(String::as_str), Some("end:ok"));
}
