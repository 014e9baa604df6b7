use std::collections::HashMap;

use serde_json::{json, Value};

use flowgraph::{EngineConfig, ExecutionStatus, GraphEngineEvent, WorkflowRunner};

use super::helpers::{finish, graph, labels, position, registry_with, started, ScriptedCode};

const BRANCH_WORKFLOW: &str = r#"
version: "0.1.0"
nodes:
  - id: start
    data:
      type: start
      title: Start
      variables:
        - { variable: x, type: number, required: true }
  - id: branch
    data:
      type: if-else
      title: Branch
      cases:
        - case_id: "true"
          conditions:
            - variable_selector: ["start", "x"]
              comparison_operator: ">"
              value: 5
  - id: a
    data: { type: template-transform, title: A, template: "big" }
  - id: b
    data: { type: template-transform, title: B, template: "small" }
edges:
  - { source: start, target: branch }
  - { source: branch, target: a, sourceHandle: "true" }
  - { source: branch, target: b, sourceHandle: "false" }
"#;

fn inputs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn test_branch_takes_matching_case_only() {
    let handle = WorkflowRunner::builder(graph(BRANCH_WORKFLOW))
        .user_inputs(inputs(&[("x", json!(10))]))
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    assert!(matches!(status, ExecutionStatus::Completed(_)));
    assert_eq!(
        labels(&events),
        vec![
            "GraphStarted",
            "NodeStarted(start)",
            "NodeSucceeded(start)",
            "NodeStarted(branch)",
            "NodeSucceeded(branch)",
            "NodeStarted(a)",
            "NodeSucceeded(a)",
            "GraphSucceeded",
        ]
    );
    let handle_taken = events.iter().find_map(|e| match e {
        GraphEngineEvent::NodeRunSucceeded {
            node_id,
            node_run_result,
            ..
        } if node_id == "branch" => Some(node_run_result.edge_source_handle.clone()),
        _ => None,
    });
    assert_eq!(handle_taken.as_deref(), Some("true"));
    assert!(!started(&events, "b"));
}

#[tokio::test]
async fn test_branch_falls_through_to_else() {
    let handle = WorkflowRunner::builder(graph(BRANCH_WORKFLOW))
        .user_inputs(inputs(&[("x", json!(3))]))
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    assert!(matches!(status, ExecutionStatus::Completed(_)));
    assert!(started(&events, "b"));
    assert!(!started(&events, "a"));
}

#[tokio::test]
async fn test_missing_required_input_fails_run() {
    let handle = WorkflowRunner::builder(graph(BRANCH_WORKFLOW))
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    match status {
        ExecutionStatus::Failed(error) => assert!(error.contains("start"), "{}", error),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(labels(&events).last().map(String::as_str), Some("GraphFailed"));
    assert!(!started(&events, "branch"));
}

const JOIN_WORKFLOW: &str = r#"
version: "0.1.0"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: left
    data: { type: code, title: Left, code: "sleep {LEFT}" }
  - id: right
    data: { type: code, title: Right, code: "sleep {RIGHT}" }
  - id: join
    data:
      type: end
      title: Join
      outputs:
        - { variable: left, value_selector: ["left", "result"] }
        - { variable: right, value_selector: ["right", "result"] }
edges:
  - { source: start, target: left }
  - { source: start, target: right }
  - { source: left, target: join }
  - { source: right, target: join }
"#;

async fn run_join(left_ms: u64, right_ms: u64) -> (Vec<String>, Vec<String>, ExecutionStatus) {
    let yaml = JOIN_WORKFLOW
        .replace("{LEFT}", &left_ms.to_string())
        .replace("{RIGHT}", &right_ms.to_string());
    let code = ScriptedCode::new();
    let handle = WorkflowRunner::builder(graph(&yaml))
        .registry(registry_with(code.clone()))
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;
    (labels(&events), code.completed(), status)
}

#[tokio::test]
async fn test_join_waits_for_both_branches() {
    for (left_ms, right_ms, first) in [(80, 10, "right"), (10, 80, "left")] {
        let (labels, completed, status) = run_join(left_ms, right_ms).await;

        assert_eq!(completed[0], first);
        let join = position(&labels, "NodeStarted(join)");
        assert!(position(&labels, "NodeSucceeded(left)") < join);
        assert!(position(&labels, "NodeSucceeded(right)") < join);
        assert_eq!(
            labels.iter().filter(|l| *l == "NodeStarted(join)").count(),
            1
        );

        let ExecutionStatus::Completed(outputs) = status else {
            panic!("expected completion, got {:?}", status);
        };
        assert_eq!(outputs.get("left"), Some(&json!("left")));
        assert_eq!(outputs.get("right"), Some(&json!("right")));
    }
}

#[tokio::test]
async fn test_branches_run_concurrently() {
    let started_at = std::time::Instant::now();
    let (_, completed, status) = run_join(150, 150).await;
    assert!(matches!(status, ExecutionStatus::Completed(_)));
    assert_eq!(completed.len(), 2);
    assert!(started_at.elapsed() < std::time::Duration::from_millis(290));
}

#[tokio::test]
async fn test_code_node_without_executor_fails() {
    let yaml = JOIN_WORKFLOW
        .replace("{LEFT}", "1")
        .replace("{RIGHT}", "1");
    let handle = WorkflowRunner::builder(graph(&yaml)).run().await.unwrap();
    let (status, _) = finish(&handle).await;

    match status {
        ExecutionStatus::Failed(error) => {
            assert!(error.contains("No executor for node type"), "{}", error)
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_max_steps_stops_run() {
    let handle = WorkflowRunner::builder(graph(BRANCH_WORKFLOW))
        .user_inputs(inputs(&[("x", json!(10))]))
        .config(EngineConfig {
            max_steps: 2,
            ..Default::default()
        })
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    match status {
        ExecutionStatus::Failed(error) => assert_eq!(error, "Max steps exceeded: 2"),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(!started(&events, "a"));
}

#[tokio::test]
async fn test_template_output_limit_is_exact() {
    let yaml = r#"
version: "0.1.0"
nodes:
  - id: start
    data:
      type: start
      title: Start
      variables:
        - { variable: word, type: string }
  - id: render
    data:
      type: template-transform
      title: Render
      template: "{{ word }}"
      variables:
        - { variable: word, value_selector: ["start", "word"] }
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
    let config = EngineConfig {
        template_max_output_length: 5,
        ..Default::default()
    };

    let handle = WorkflowRunner::builder(graph(yaml))
        .user_inputs(inputs(&[("word", json!("héllo"))]))
        .config(config.clone())
        .run()
        .await
        .unwrap();
    let (status, _) = finish(&handle).await;
    let ExecutionStatus::Completed(outputs) = status else {
        panic!("expected completion, got {:?}", status);
    };
    assert_eq!(outputs.get("text"), Some(&json!("héllo")));

    let handle = WorkflowRunner::builder(graph(yaml))
        .user_inputs(inputs(&[("word", json!("héllo!"))]))
        .config(config)
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;
    assert!(matches!(status, ExecutionStatus::Failed(_)));
    assert!(labels(&events).contains(&"NodeFailed(render)".to_string()));
}
