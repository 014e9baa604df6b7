use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use flowgraph::{ExecutionStatus, GraphEngineEvent, WorkflowRunner};

use super::helpers::{finish, graph, labels, registry_with, started, ScriptedCode};

const STUCK_WORKFLOW: &str = r#"
version: "0.1.0"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: stuck
    data: { type: code, title: Stuck, code: "wait_cancel" }
  - id: end
    data: { type: end, title: End, outputs: [] }
edges:
  - { source: start, target: stuck }
  - { source: stuck, target: end }
"#;

async fn wait_until_started(handle: &flowgraph::WorkflowHandle, node_id: &str) {
    for _ in 0..200 {
        if started(&handle.events(), node_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never started", node_id);
}

#[tokio::test]
async fn test_abort_cancels_in_flight_node() {
    let handle = WorkflowRunner::builder(graph(STUCK_WORKFLOW))
        .registry(registry_with(ScriptedCode::new()))
        .run()
        .await
        .unwrap();
    wait_until_started(&handle, "stuck").await;
    handle.abort(Some("user stop".to_string())).await.unwrap();
    let (status, events) = finish(&handle).await;

    assert_eq!(status, ExecutionStatus::Aborted("user stop".to_string()));
    let labels = labels(&events);
    assert_eq!(labels.last().map(String::as_str), Some("GraphAborted"));
    assert!(labels.contains(&"NodeFailed(stuck)".to_string()));
    assert!(!started(&events, "end"));
    assert!(matches!(
        events.last(),
        Some(GraphEngineEvent::GraphRunAborted { reason: Some(r), .. }) if r == "user stop"
    ));
}

#[tokio::test]
async fn test_abort_without_reason() {
    let handle = WorkflowRunner::builder(graph(STUCK_WORKFLOW))
        .registry(registry_with(ScriptedCode::new()))
        .run()
        .await
        .unwrap();
    wait_until_started(&handle, "stuck").await;
    handle.abort(None).await.unwrap();
    handle.abort(None).await.unwrap();
    let (status, _) = finish(&handle).await;

    assert_eq!(
        status,
        ExecutionStatus::Aborted("aborted by command".to_string())
    );
}

#[tokio::test]
async fn test_update_variables_visible_to_later_nodes() {
    let yaml = r#"
version: "0.1.0"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: wait
    data: { type: code, title: Wait, code: "sleep 200" }
  - id: render
    data:
      type: template-transform
      title: Render
      template: "topic={{ topic }}"
      variables:
        - { variable: topic, value_selector: ["conv", "topic"] }
  - id: end
    data:
      type: end
      title: End
      outputs:
        - { variable: text, value_selector: ["render", "output"] }
edges:
  - { source: start, target: wait }
  - { source: wait, target: render }
  - { source: render, target: end }
"#;
    let handle = WorkflowRunner::builder(graph(yaml))
        .registry(registry_with(ScriptedCode::new()))
        .run()
        .await
        .unwrap();
    handle
        .update_variables(HashMap::from([("conv.topic".to_string(), json!("rust"))]))
        .await
        .unwrap();
    let (status, _) = finish(&handle).await;

    let ExecutionStatus::Completed(outputs) = status else {
        panic!("expected completion, got {:?}", status);
    };
    assert_eq!(outputs.get("text"), Some(&json!("topic=rust")));
}

#[tokio::test]
async fn test_environment_and_system_variables() {
    let yaml = r#"
version: "0.1.0"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: render
    data:
      type: template-transform
      title: Render
      template: "{{ region }}/{{ user }}"
      variables:
        - { variable: region, value_selector: ["env", "region"] }
        - { variable: user, value_selector: ["sys", "user_id"] }
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
    let handle = WorkflowRunner::builder(graph(yaml))
        .environment_vars(HashMap::from([("region".to_string(), json!("eu"))]))
        .system_vars(flowgraph::SystemVariables {
            user_id: Some("u-1".to_string()),
            ..Default::default()
        })
        .workflow_execution_id("exec-vars")
        .run()
        .await
        .unwrap();
    assert_eq!(handle.workflow_execution_id(), "exec-vars");
    let (status, _) = finish(&handle).await;

    let ExecutionStatus::Completed(outputs) = status else {
        panic!("expected completion, got {:?}", status);
    };
    assert_eq!(outputs.get("text"), Some(&json!("eu/u-1")));
}

#[tokio::test]
async fn test_declared_environment_defaults() {
    let yaml = r#"
version: "0.1.0"
environment_variables:
  - { name: region, value: us }
  - { name: tier, value: free }
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: render
    data:
      type: template-transform
      title: Render
      template: "{{ region }}/{{ tier }}"
      variables:
        - { variable: region, value_selector: ["env", "region"] }
        - { variable: tier, value_selector: ["env", "tier"] }
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
    let handle = WorkflowRunner::builder(graph(yaml))
        .environment_vars(HashMap::from([("region".to_string(), json!("eu"))]))
        .run()
        .await
        .unwrap();
    let (status, _) = finish(&handle).await;

    let ExecutionStatus::Completed(outputs) = status else {
        panic!("expected completion, got {:?}", status);
    };
    assert_eq!(outputs.get("text"), Some(&json!("eu/free")));
}
