use std::collections::HashMap;

use serde_json::json;

use flowgraph::{ExecutionStatus, WorkflowRunner};

use super::helpers::{finish, graph, registry_with, ScriptedCode};

const ITERATION_WORKFLOW: &str = r#"
version: "0.1.0"
nodes:
  - id: start
    data:
      type: start
      title: Start
      variables:
        - { variable: items, type: "array[string]", required: true }
  - id: each
    data:
      type: iteration
      title: Each
      iterator_selector: ["start", "items"]
      output_selector: ["shout", "output"]
      is_parallel: {PARALLEL}
      parallel_nums: 2
      error_handle_mode: {MODE}
      sub_graph:
        nodes:
          - id: each_start
            data: { type: iteration-start }
          - id: shout
            data:
              type: template-transform
              template: "{{ item | upper }}"
              max_output_length: 4
              variables:
                - { variable: item, value_selector: ["each", "item"] }
        edges:
          - { source: each_start, target: shout }
  - id: end
    data:
      type: end
      title: End
      outputs:
        - { variable: shouted, value_selector: ["each", "output"] }
edges:
  - { source: start, target: each }
  - { source: each, target: end }
"#;

fn iteration_workflow(parallel: bool, mode: &str) -> String {
    ITERATION_WORKFLOW
        .replace("{PARALLEL}", &parallel.to_string())
        .replace("{MODE}", mode)
}

async fn run_iteration(
    parallel: bool,
    mode: &str,
    items: serde_json::Value,
) -> ExecutionStatus {
    let handle = WorkflowRunner::builder(graph(&iteration_workflow(parallel, mode)))
        .user_inputs(HashMap::from([("items".to_string(), items)]))
        .run()
        .await
        .unwrap();
    finish(&handle).await.0
}

#[tokio::test]
async fn test_iteration_in_full_run() {
    for parallel in [false, true] {
        let status = run_iteration(parallel, "terminated", json!(["a", "b", "c"])).await;
        let ExecutionStatus::Completed(outputs) = status else {
            panic!("expected completion, got {:?}", status);
        };
        assert_eq!(outputs.get("shouted"), Some(&json!(["A", "B", "C"])));
    }
}

#[tokio::test]
async fn test_iteration_error_modes_in_full_run() {
    let items = json!(["ok", "too long", "fine"]);

    let status = run_iteration(false, "terminated", items.clone()).await;
    assert!(matches!(status, ExecutionStatus::Failed(_)));

    let status = run_iteration(false, "remove-abnormal-output", items.clone()).await;
    let ExecutionStatus::Completed(outputs) = status else {
        panic!("expected completion, got {:?}", status);
    };
    assert_eq!(outputs.get("shouted"), Some(&json!(["OK", "FINE"])));

    let status = run_iteration(true, "continue-on-error", items).await;
    let ExecutionStatus::Completed(outputs) = status else {
        panic!("expected completion, got {:?}", status);
    };
    assert_eq!(outputs.get("shouted"), Some(&json!(["OK", null, "FINE"])));
}

const LOOP_WORKFLOW: &str = r#"
version: "0.1.0"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: repeat
    data:
      type: loop
      title: Repeat
      loop_count: 10
      break_conditions:
        - variable_selector: ["repeat", "acc"]
          comparison_operator: is
          value: "xxxx"
      loop_variables:
        - { label: acc, value: "" }
      sub_graph:
        nodes:
          - id: body_start
            data: { type: loop-start }
          - id: step
            data: { type: code, code: "" }
          - id: grow
            data:
              type: template-transform
              template: "{{ acc }}x"
              variables:
                - { variable: acc, value_selector: ["repeat", "acc"] }
          - id: body_end
            data:
              type: end
              outputs:
                - { variable: acc, value_selector: ["grow", "output"] }
        edges:
          - { source: body_start, target: step }
          - { source: step, target: grow }
          - { source: grow, target: body_end }
  - id: end
    data:
      type: end
      title: End
      outputs:
        - { variable: acc, value_selector: ["repeat", "acc"] }
        - { variable: rounds, value_selector: ["repeat", "loop_round"] }
edges:
  - { source: start, target: repeat }
  - { source: repeat, target: end }
"#;

#[tokio::test]
async fn test_loop_breaks_on_condition() {
    let code = ScriptedCode::new();
    let handle = WorkflowRunner::builder(graph(LOOP_WORKFLOW))
        .registry(registry_with(code.clone()))
        .run()
        .await
        .unwrap();
    let (status, _) = finish(&handle).await;

    let ExecutionStatus::Completed(outputs) = status else {
        panic!("expected completion, got {:?}", status);
    };
    assert_eq!(outputs.get("acc"), Some(&json!("xxxx")));
    assert_eq!(outputs.get("rounds"), Some(&json!(4)));
    // The host executor is reused inside the loop body.
    assert_eq!(code.attempts("step"), 4);
}

const SLOW_OR_BAD_WORKFLOW: &str = r#"
version: "0.1.0"
nodes:
  - id: start
    data:
      type: start
      title: Start
      variables:
        - { variable: items, type: "array[string]", required: true }
  - id: each
    data:
      type: iteration
      title: Each
      iterator_selector: ["start", "items"]
      output_selector: ["pick", "result"]
      is_parallel: true
      parallel_nums: 2
      error_handle_mode: terminated
      sub_graph:
        nodes:
          - id: each_start
            data: { type: iteration-start }
          - id: route
            data:
              type: if-else
              cases:
                - case_id: "true"
                  conditions:
                    - variable_selector: ["each", "item"]
                      comparison_operator: is
                      value: slow
          - id: slow_step
            data: { type: code, code: "sleep 300" }
          - id: bad_step
            data: { type: code, code: "fail" }
        edges:
          - { source: each_start, target: route }
          - { source: route, target: slow_step, sourceHandle: "true" }
          - { source: route, target: bad_step, sourceHandle: "false" }
  - id: end
    data: { type: end, title: End, outputs: [] }
edges:
  - { source: start, target: each }
  - { source: each, target: end }
"#;

#[tokio::test]
async fn test_failed_iteration_leaves_no_running_workers() {
    let code = ScriptedCode::new();
    let handle = WorkflowRunner::builder(graph(SLOW_OR_BAD_WORKFLOW))
        .registry(registry_with(code.clone()))
        .user_inputs(HashMap::from([(
            "items".to_string(),
            json!(["slow", "bad"]),
        )]))
        .run()
        .await
        .unwrap();
    let (status, _) = finish(&handle).await;
    assert!(matches!(status, ExecutionStatus::Failed(_)), "{:?}", status);

    // Long enough for the slow pass to have finished had it kept running.
    tokio::time::sleep(std::time::Duration::from_millis(600)).await;
    assert!(code.completed().is_empty(), "{:?}", code.completed());
}
