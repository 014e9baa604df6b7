use std::collections::HashMap;
use std::sync::Arc;

use flowgraph::{init_tracing, parse_dsl, DslFormat, ExecutionStatus, Graph, WorkflowRunner};

const DEMO_WORKFLOW: &str = r#"
version: "0.1.0"
nodes:
  - id: start
    data:
      type: start
      title: Start
      variables:
        - variable: query
          label: Query
          type: string
          required: true
  - id: check
    data:
      type: if-else
      title: Check Length
      cases:
        - case_id: long
          logical_operator: and
          conditions:
            - variable_selector: ["start", "query"]
              comparison_operator: not_empty
  - id: shout
    data:
      type: template-transform
      title: Shout
      template: "{{ query | upper }}!"
      variables:
        - variable: query
          value_selector: ["start", "query"]
  - id: answer
    data:
      type: answer
      title: Answer
      answer: "You said: {{#shout.output#}}"
  - id: fallback
    data:
      type: answer
      title: No Query
      answer: "No query provided."
edges:
  - source: start
    target: check
  - source: check
    target: shout
    sourceHandle: long
  - source: shout
    target: answer
  - source: check
    target: fallback
    sourceHandle: "false"
"#;

#[tokio::main]
async fn main() {
    init_tracing();

    println!("=== flowgraph demo ===\n");

    let schema = match parse_dsl(DEMO_WORKFLOW, DslFormat::Yaml) {
        Ok(schema) => schema,
        Err(e) => {
            eprintln!("failed to parse workflow: {}", e);
            std::process::exit(1);
        }
    };
    println!(
        "[OK] workflow parsed ({} nodes, {} edges)",
        schema.nodes.len(),
        schema.edges.len()
    );
    let graph = match Graph::init(&schema, None, false) {
        Ok(graph) => Arc::new(graph),
        Err(e) => {
            eprintln!("invalid workflow: {}", e);
            std::process::exit(1);
        }
    };

    let query = std::env::args().nth(1).unwrap_or_else(|| "hello, flowgraph".to_string());
    let mut inputs = HashMap::new();
    inputs.insert("query".to_string(), serde_json::Value::String(query));

    let handle = match WorkflowRunner::builder(graph).user_inputs(inputs).run().await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("failed to start workflow: {}", e);
            std::process::exit(1);
        }
    };

    let mut stream = handle.event_stream();
    while let Some(record) = stream.next().await {
        print!("{}", record.to_sse());
    }

    match handle.wait().await {
        ExecutionStatus::Completed(outputs) => {
            println!("=== Workflow completed ===");
            for (k, v) in &outputs {
                println!("  {} = {}", k, v);
            }
        }
        ExecutionStatus::PartialSucceeded {
            outputs,
            exceptions_count,
        } => {
            println!("=== Workflow partially succeeded ({} exception(s)) ===", exceptions_count);
            for (k, v) in &outputs {
                println!("  {} = {}", k, v);
            }
        }
        ExecutionStatus::Failed(error) => println!("=== Workflow failed: {} ===", error),
        ExecutionStatus::Aborted(reason) => println!("=== Workflow aborted: {} ===", reason),
        ExecutionStatus::Paused { pause_id, .. } => {
            println!("=== Workflow paused ({}) ===", pause_id)
        }
        ExecutionStatus::Running => println!("=== Workflow still running ==="),
    }
}
