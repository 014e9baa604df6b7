use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use flowgraph::{GraphEngineEvent, StreamResponse, WorkflowRunner};

use super::helpers::{graph, registry_with, with_timeout, ScriptedCode, TEST_TIMEOUT};

const ANSWER_WORKFLOW: &str = r#"
version: "0.1.0"
nodes:
  - id: start
    data:
      type: start
      title: Start
      variables:
        - { variable: name, type: string }
  - id: answer
    data:
      type: answer
      title: Answer
      answer: "Hello, {{#start.name#}}"
edges:
  - { source: start, target: answer }
"#;

fn names(records: &[StreamResponse]) -> Vec<&str> {
    records.iter().map(|r| r.event.as_str()).collect()
}

#[tokio::test]
async fn test_event_stream_records() {
    let handle = WorkflowRunner::builder(graph(ANSWER_WORKFLOW))
        .user_inputs(HashMap::from([("name".to_string(), json!("Ada"))]))
        .workflow_execution_id("run-7")
        .run()
        .await
        .unwrap();

    let records: Vec<StreamResponse> = with_timeout(
        "event stream",
        TEST_TIMEOUT,
        handle.event_stream().into_stream().collect(),
    )
    .await;

    let names = names(&records);
    assert_eq!(names.first(), Some(&"workflow_started"));
    assert_eq!(names.last(), Some(&"workflow_finished"));
    assert_eq!(names.iter().filter(|n| **n == "node_started").count(), 2);
    assert_eq!(names.iter().filter(|n| **n == "node_finished").count(), 2);
    assert!(records.iter().all(|r| r.workflow_run_id == "run-7"));

    let chunk = records
        .iter()
        .find(|r| r.event == "text_chunk")
        .expect("answer streams its text");
    assert_eq!(chunk.data["text"], json!("Hello, Ada"));
    assert_eq!(chunk.data["from_node_id"], json!("answer"));

    let finished = records.last().unwrap();
    assert_eq!(finished.data["status"], json!("succeeded"));
    assert_eq!(finished.data["outputs"]["answer"], json!("Hello, Ada"));

    let sse = finished.to_sse();
    assert!(sse.starts_with("data: {"));
    assert!(sse.ends_with("\n\n"));
}

#[tokio::test]
async fn test_late_subscriber_gets_full_history() {
    let handle = WorkflowRunner::builder(graph(ANSWER_WORKFLOW))
        .user_inputs(HashMap::from([("name".to_string(), json!("Bo"))]))
        .run()
        .await
        .unwrap();
    with_timeout("run", TEST_TIMEOUT, handle.wait()).await;

    let mut rx = handle.subscribe();
    let mut replayed = Vec::new();
    while let Some(event) = rx.recv().await {
        replayed.push(event.event);
    }
    assert_eq!(replayed.len(), handle.events().len());
    assert!(matches!(
        replayed.first(),
        Some(GraphEngineEvent::GraphRunStarted { .. })
    ));
    assert!(matches!(
        replayed.last(),
        Some(GraphEngineEvent::GraphRunSucceeded { .. })
    ));
}

#[tokio::test]
async fn test_idle_stream_pings() {
    let yaml = r#"
version: "0.1.0"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: slow
    data: { type: code, title: Slow, code: "sleep 250" }
edges:
  - { source: start, target: slow }
"#;
    let handle = WorkflowRunner::builder(graph(yaml))
        .registry(registry_with(ScriptedCode::new()))
        .ping_interval(Duration::from_millis(50))
        .run()
        .await
        .unwrap();

    let records: Vec<StreamResponse> = with_timeout(
        "event stream",
        TEST_TIMEOUT,
        handle.event_stream().into_stream().collect(),
    )
    .await;
    let names = names(&records);
    assert!(names.contains(&"ping"));
    assert_eq!(names.last(), Some(&"workflow_finished"));
}
