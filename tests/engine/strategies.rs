use serde_json::json;

use flowgraph::{ExecutionStatus, GraphEngineEvent, WorkflowRunner};

use super::helpers::{finish, graph, labels, registry_with, started, ScriptedCode};

fn single_node_workflow(code: &str, node_extra: &str) -> String {
    format!(
        r#"
version: "0.1.0"
nodes:
  - id: start
    data: {{ type: start, title: Start }}
  - id: work
    data:
      type: code
      title: Work
      code: "{code}"
{node_extra}
  - id: end
    data:
      type: end
      title: End
      outputs:
        - {{ variable: result, value_selector: ["work", "result"] }}
edges:
  - {{ source: start, target: work }}
  - {{ source: work, target: end }}
"#
    )
}

fn retry_indexes(events: &[GraphEngineEvent]) -> Vec<i32> {
    events
        .iter()
        .filter_map(|e| match e {
            GraphEngineEvent::NodeRunRetry { retry_index, .. } => Some(*retry_index),
            _ => None,
        })
        .collect()
}

const RETRY_THREE_TIMES: &str = "      retry_config: { max_retries: 3, retry_interval: 1 }";

#[tokio::test]
async fn test_retry_until_success() {
    let code = ScriptedCode::new();
    let handle = WorkflowRunner::builder(graph(&single_node_workflow("fail 2", RETRY_THREE_TIMES)))
        .registry(registry_with(code.clone()))
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    let ExecutionStatus::Completed(outputs) = status else {
        panic!("expected completion, got {:?}", status);
    };
    assert_eq!(outputs.get("result"), Some(&json!("work")));
    assert_eq!(code.attempts("work"), 3);
    assert_eq!(retry_indexes(&events), vec![1, 2]);

    let succeeded_retry_index = events.iter().find_map(|e| match e {
        GraphEngineEvent::NodeRunSucceeded {
            node_id,
            node_run_result,
            ..
        } if node_id == "work" => Some(node_run_result.retry_index),
        _ => None,
    });
    assert_eq!(succeeded_retry_index, Some(2));
}

#[tokio::test]
async fn test_retries_exhausted() {
    let code = ScriptedCode::new();
    let extra = "      retry_config: { max_retries: 2, retry_interval: 1 }";
    let handle = WorkflowRunner::builder(graph(&single_node_workflow("fail", extra)))
        .registry(registry_with(code.clone()))
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    match status {
        ExecutionStatus::Failed(error) => assert!(error.contains("node=work"), "{}", error),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(code.attempts("work"), 3);
    assert_eq!(retry_indexes(&events), vec![1, 2]);
    assert!(!started(&events, "end"));
}

#[tokio::test]
async fn test_non_retryable_error_is_not_retried() {
    let code = ScriptedCode::new();
    let handle =
        WorkflowRunner::builder(graph(&single_node_workflow("explode", RETRY_THREE_TIMES)))
            .registry(registry_with(code.clone()))
            .run()
            .await
            .unwrap();
    let (status, events) = finish(&handle).await;

    assert!(matches!(status, ExecutionStatus::Failed(_)));
    assert_eq!(code.attempts("work"), 1);
    assert!(retry_indexes(&events).is_empty());
}

#[tokio::test]
async fn test_node_timeout() {
    let code = ScriptedCode::new();
    let handle =
        WorkflowRunner::builder(graph(&single_node_workflow("sleep 5000", "      timeout_secs: 1")))
            .registry(registry_with(code.clone()))
            .run()
            .await
            .unwrap();
    let (status, events) = finish(&handle).await;

    match status {
        ExecutionStatus::Failed(error) => assert!(error.contains("Timeout"), "{}", error),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(labels(&events).contains(&"NodeFailed(work)".to_string()));
    assert!(code.completed().is_empty());
}

#[tokio::test]
async fn test_default_value_strategy() {
    let extra = r#"      error_strategy:
        type: default-value
        default_value: { result: fallback }"#;
    let handle = WorkflowRunner::builder(graph(&single_node_workflow("fail", extra)))
        .registry(registry_with(ScriptedCode::new()))
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    let ExecutionStatus::PartialSucceeded {
        outputs,
        exceptions_count,
    } = status
    else {
        panic!("expected partial success, got {:?}", status);
    };
    assert_eq!(exceptions_count, 1);
    assert_eq!(outputs.get("result"), Some(&json!("fallback")));
    let labels = labels(&events);
    assert!(labels.contains(&"NodeException(work)".to_string()));
    assert_eq!(labels.last().map(String::as_str), Some("GraphPartialSucceeded"));
}

const FAIL_BRANCH_WORKFLOW: &str = r#"
version: "0.1.0"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: work
    data:
      type: code
      title: Work
      code: "fail"
      error_strategy: fail-branch
  - id: ok
    data: { type: template-transform, title: Ok, template: "ok" }
  - id: recover
    data:
      type: template-transform
      title: Recover
      template: "{{ kind }}"
      variables:
        - { variable: kind, value_selector: ["work", "error_type"] }
  - id: end
    data:
      type: end
      title: End
      outputs:
        - { variable: handled, value_selector: ["recover", "output"] }
        - { variable: message, value_selector: ["work", "error_message"] }
edges:
  - { source: start, target: work }
  - { source: work, target: ok }
  - { source: work, target: recover, sourceHandle: fail-branch }
  - { source: recover, target: end }
"#;

#[tokio::test]
async fn test_fail_branch_strategy() {
    let handle = WorkflowRunner::builder(graph(FAIL_BRANCH_WORKFLOW))
        .registry(registry_with(ScriptedCode::new()))
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    let ExecutionStatus::PartialSucceeded {
        outputs,
        exceptions_count,
    } = status
    else {
        panic!("expected partial success, got {:?}", status);
    };
    assert_eq!(exceptions_count, 1);
    assert_eq!(
        outputs.get("message"),
        Some(&json!("Execution error: script failed"))
    );
    assert!(outputs.get("handled").is_some());
    assert!(started(&events, "recover"));
    assert!(!started(&events, "ok"));
}

#[tokio::test]
async fn test_fail_branch_without_edge_fails() {
    let yaml = FAIL_BRANCH_WORKFLOW.replace(
        "  - { source: work, target: recover, sourceHandle: fail-branch }\n  - { source: recover, target: end }\n",
        "  - { source: start, target: recover }\n  - { source: recover, target: end }\n",
    );
    let handle = WorkflowRunner::builder(graph(&yaml))
        .registry(registry_with(ScriptedCode::new()))
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    assert!(matches!(status, ExecutionStatus::Failed(_)));
    assert!(labels(&events).contains(&"NodeFailed(work)".to_string()));
}
