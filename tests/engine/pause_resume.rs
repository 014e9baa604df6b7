use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use flowgraph::{
    ExecutionStatus, FilePauseRepository, FormRepository, GraphEngineEvent, MemoryFormRepository,
    MemoryPauseRepository, PauseDetail, PauseRepository, PauseType, ResumePayload, WorkflowError,
    WorkflowRunner,
};

use super::helpers::{finish, graph, labels, registry_with, started, ScriptedCode};

const REVIEW_WORKFLOW: &str = r#"
version: "0.1.0"
nodes:
  - id: start
    data:
      type: start
      title: Start
      variables:
        - { variable: doc, type: string }
  - id: review
    data:
      type: human-input
      title: Review
      form_content: "Approve {{#start.doc#}}?"
      inputs:
        - { output_variable_name: comment, type: paragraph }
      user_actions:
        - { id: approve, title: Approve }
        - { id: reject, title: Reject }
  - id: approved
    data:
      type: template-transform
      title: Approved
      template: "{{ doc }}:{{ comment }}"
      variables:
        - { variable: doc, value_selector: ["start", "doc"] }
        - { variable: comment, value_selector: ["review", "comment"] }
  - id: rejected
    data: { type: template-transform, title: Rejected, template: "rejected" }
  - id: end
    data:
      type: end
      title: End
      outputs:
        - { variable: verdict, value_selector: ["approved", "output"] }
edges:
  - { source: start, target: review }
  - { source: review, target: approved, sourceHandle: approve }
  - { source: review, target: rejected, sourceHandle: reject }
  - { source: approved, target: end }
"#;

fn doc_input() -> HashMap<String, serde_json::Value> {
    HashMap::from([("doc".to_string(), json!("report.pdf"))])
}

fn paused_runtime_id(events: &[GraphEngineEvent]) -> String {
    events
        .iter()
        .find_map(|e| match e {
            GraphEngineEvent::NodeRunPaused { id, node_id, .. } if node_id == "review" => {
                Some(id.clone())
            }
            _ => None,
        })
        .expect("review should pause")
}

async fn pause_first_run(repository: Arc<dyn PauseRepository>) -> (String, String) {
    let handle = WorkflowRunner::builder(graph(REVIEW_WORKFLOW))
        .user_inputs(doc_input())
        .pause_repository(repository)
        .run()
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    let ExecutionStatus::Paused { pause_id, details } = status else {
        panic!("expected pause, got {:?}", status);
    };
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].node_id.as_deref(), Some("review"));
    assert!(matches!(
        details[0].pause_type,
        PauseType::HumanInputPause { .. }
    ));
    assert_eq!(
        labels(&events).last().map(String::as_str),
        Some("GraphPaused")
    );
    assert!(!started(&events, "approved"));
    (pause_id, paused_runtime_id(&events))
}

fn approve() -> ResumePayload {
    ResumePayload {
        action: Some("approve".to_string()),
        form_data: HashMap::from([("comment".to_string(), json!("lgtm"))]),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_human_input_pause_and_resume() {
    let repository = Arc::new(MemoryPauseRepository::new());
    let (pause_id, paused_id) = pause_first_run(repository.clone()).await;

    let entity = repository.get(&pause_id).await.unwrap().unwrap();
    assert!(!entity.is_resumed());

    let handle = WorkflowRunner::builder(graph(REVIEW_WORKFLOW))
        .pause_repository(repository.clone())
        .resume(&pause_id, approve())
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    let ExecutionStatus::Completed(outputs) = status else {
        panic!("expected completion, got {:?}", status);
    };
    // `doc` came from the first run's pool.
    assert_eq!(outputs.get("verdict"), Some(&json!("report.pdf:lgtm")));

    assert!(matches!(
        &events[0],
        GraphEngineEvent::GraphRunStarted { resumed_from: Some(id), .. } if *id == pause_id
    ));
    let predecessor = events.iter().find_map(|e| match e {
        GraphEngineEvent::NodeRunStarted {
            node_id,
            predecessor_runtime_node_id,
            ..
        } if node_id == "review" => Some(predecessor_runtime_node_id.clone()),
        _ => None,
    });
    assert_eq!(predecessor, Some(Some(paused_id)));
    assert!(!started(&events, "start"));
    assert!(!started(&events, "rejected"));

    assert!(repository.get(&pause_id).await.unwrap().unwrap().is_resumed());
}

#[tokio::test]
async fn test_resume_is_single_shot() {
    let repository = Arc::new(MemoryPauseRepository::new());
    let (pause_id, _) = pause_first_run(repository.clone()).await;

    let handle = WorkflowRunner::builder(graph(REVIEW_WORKFLOW))
        .pause_repository(repository.clone())
        .resume(&pause_id, approve())
        .await
        .unwrap();
    finish(&handle).await;

    let err = WorkflowRunner::builder(graph(REVIEW_WORKFLOW))
        .pause_repository(repository.clone())
        .resume(&pause_id, approve())
        .await
        .err()
        .expect("second resume should fail");
    assert!(matches!(err, WorkflowError::AlreadyResumed(id) if id == pause_id));
}

#[tokio::test]
async fn test_resume_errors() {
    let err = WorkflowRunner::builder(graph(REVIEW_WORKFLOW))
        .pause_repository(Arc::new(MemoryPauseRepository::new()))
        .resume("missing", ResumePayload::default())
        .await
        .err()
        .expect("unknown pause should fail");
    assert!(matches!(err, WorkflowError::PauseNotFound(_)));

    let err = WorkflowRunner::builder(graph(REVIEW_WORKFLOW))
        .resume("missing", ResumePayload::default())
        .await
        .err()
        .expect("resume without repository should fail");
    assert!(matches!(err, WorkflowError::ConfigError(_)));
}

#[tokio::test]
async fn test_pause_without_repository_fails_run() {
    let handle = WorkflowRunner::builder(graph(REVIEW_WORKFLOW))
        .user_inputs(doc_input())
        .run()
        .await
        .unwrap();
    let (status, _) = finish(&handle).await;
    assert!(matches!(status, ExecutionStatus::Failed(_)));
}

#[tokio::test]
async fn test_reject_action_routes_to_reject_branch() {
    let repository = Arc::new(MemoryPauseRepository::new());
    let (pause_id, _) = pause_first_run(repository.clone()).await;

    let handle = WorkflowRunner::builder(graph(REVIEW_WORKFLOW))
        .pause_repository(repository)
        .resume(
            &pause_id,
            ResumePayload {
                action: Some("reject".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let (status, events) = finish(&handle).await;

    let ExecutionStatus::Completed(outputs) = status else {
        panic!("expected completion, got {:?}", status);
    };
    assert!(outputs.is_empty());
    assert!(started(&events, "rejected"));
    assert!(!started(&events, "approved"));
    assert!(!started(&events, "end"));
}

#[tokio::test]
async fn test_file_repository_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (pause_id, _) = {
        let repository = Arc::new(FilePauseRepository::new(dir.path()).unwrap());
        pause_first_run(repository).await
    };

    let reopened = Arc::new(FilePauseRepository::new(dir.path()).unwrap());
    let handle = WorkflowRunner::builder(graph(REVIEW_WORKFLOW))
        .pause_repository(reopened.clone())
        .resume(&pause_id, approve())
        .await
        .unwrap();
    let (status, _) = finish(&handle).await;

    let ExecutionStatus::Completed(outputs) = status else {
        panic!("expected completion, got {:?}", status);
    };
    assert_eq!(outputs.get("verdict"), Some(&json!("report.pdf:lgtm")));
    assert!(reopened.get(&pause_id).await.unwrap().unwrap().is_resumed());
}

#[tokio::test]
async fn test_form_submission_completes_on_resume() {
    let pauses = Arc::new(MemoryPauseRepository::new());
    let forms = Arc::new(MemoryFormRepository::new());

    let handle = WorkflowRunner::builder(graph(REVIEW_WORKFLOW))
        .user_inputs(doc_input())
        .pause_repository(pauses.clone())
        .form_repository(forms.clone())
        .workflow_execution_id("exec-forms")
        .run()
        .await
        .unwrap();
    let (status, _) = finish(&handle).await;
    let ExecutionStatus::Paused { pause_id, details } = status else {
        panic!("expected pause, got {:?}", status);
    };

    let form = forms.get_form("exec-forms", "review").await.unwrap().unwrap();
    assert_eq!(form.form_content, "Approve report.pdf?");
    assert_eq!(
        details[0].pause_type,
        PauseType::HumanInputPause {
            form_id: form.id.clone()
        }
    );
    forms
        .submit(
            &form.id,
            "approve",
            HashMap::from([("comment".to_string(), json!("via form"))]),
        )
        .await
        .unwrap();

    let handle = WorkflowRunner::builder(graph(REVIEW_WORKFLOW))
        .pause_repository(pauses)
        .form_repository(forms)
        .resume(&pause_id, ResumePayload::default())
        .await
        .unwrap();
    assert_eq!(handle.workflow_execution_id(), "exec-forms");
    let (status, _) = finish(&handle).await;

    let ExecutionStatus::Completed(outputs) = status else {
        panic!("expected completion, got {:?}", status);
    };
    assert_eq!(outputs.get("verdict"), Some(&json!("report.pdf:via form")));
}

const SLOW_WORKFLOW: &str = r#"
version: "0.1.0"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: slow
    data: { type: code, title: Slow, code: "sleep 300" }
  - id: after
    data: { type: code, title: After, code: "" }
  - id: end
    data:
      type: end
      title: End
      outputs:
        - { variable: last, value_selector: ["after", "result"] }
edges:
  - { source: start, target: slow }
  - { source: slow, target: after }
  - { source: after, target: end }
"#;

#[tokio::test]
async fn test_pause_command_then_resume() {
    let repository = Arc::new(MemoryPauseRepository::new());
    let code = ScriptedCode::new();

    let handle = WorkflowRunner::builder(graph(SLOW_WORKFLOW))
        .registry(registry_with(code.clone()))
        .pause_repository(repository.clone())
        .run()
        .await
        .unwrap();
    handle.pause().await.unwrap();
    let (status, events) = finish(&handle).await;

    let ExecutionStatus::Paused { pause_id, details } = status else {
        panic!("expected pause, got {:?}", status);
    };
    assert!(matches!(
        details.as_slice(),
        [PauseDetail {
            pause_type: PauseType::SchedulingPause {},
            node_id: None,
            ..
        }]
    ));
    assert!(!started(&events, "after"));

    let handle = WorkflowRunner::builder(graph(SLOW_WORKFLOW))
        .registry(registry_with(code.clone()))
        .pause_repository(repository)
        .resume(&pause_id, ResumePayload::default())
        .await
        .unwrap();
    let (status, _) = finish(&handle).await;

    let ExecutionStatus::Completed(outputs) = status else {
        panic!("expected completion, got {:?}", status);
    };
    assert_eq!(outputs.get("last"), Some(&json!("after")));
    assert_eq!(code.attempts("slow"), 1);
    assert_eq!(code.attempts("after"), 1);
}

const TWO_APPROVALS_WORKFLOW: &str = r#"
version: "0.1.0"
nodes:
  - id: start
    data: { type: start, title: Start }
  - id: legal
    data:
      type: human-input
      title: Legal
      form_content: "Legal sign-off?"
      user_actions:
        - { id: approve, title: Approve }
        - { id: reject, title: Reject }
  - id: finance
    data:
      type: human-input
      title: Finance
      form_content: "Budget ok?"
      user_actions:
        - { id: ok, title: Ok }
        - { id: deny, title: Deny }
  - id: end
    data:
      type: end
      title: End
      outputs:
        - { variable: legal, value_selector: ["legal", "action"] }
        - { variable: finance, value_selector: ["finance", "action"] }
edges:
  - { source: start, target: legal }
  - { source: start, target: finance }
  - { source: legal, target: end, sourceHandle: approve }
  - { source: finance, target: end, sourceHandle: ok }
"#;

fn action_for(node_id: Option<&str>, action: &str) -> ResumePayload {
    ResumePayload {
        node_id: node_id.map(str::to_string),
        action: Some(action.to_string()),
        ..Default::default()
    }
}

async fn expect_pause(handle: &flowgraph::WorkflowHandle) -> (String, Vec<PauseDetail>) {
    match finish(handle).await.0 {
        ExecutionStatus::Paused { pause_id, details } => (pause_id, details),
        other => panic!("expected pause, got {:?}", other),
    }
}

#[tokio::test]
async fn test_parallel_pauses_resume_one_node_at_a_time() {
    let repository = Arc::new(MemoryPauseRepository::new());
    let handle = WorkflowRunner::builder(graph(TWO_APPROVALS_WORKFLOW))
        .pause_repository(repository.clone())
        .run()
        .await
        .unwrap();
    let (first_pause, details) = expect_pause(&handle).await;
    let mut paused: Vec<_> = details.iter().filter_map(|d| d.node_id.clone()).collect();
    paused.sort();
    assert_eq!(paused, vec!["finance", "legal"]);

    // With two nodes waiting, an action has to say which node it answers.
    let err = WorkflowRunner::builder(graph(TWO_APPROVALS_WORKFLOW))
        .pause_repository(repository.clone())
        .resume(&first_pause, action_for(None, "approve"))
        .await
        .err()
        .expect("ambiguous payload should be rejected");
    assert!(matches!(err, WorkflowError::ConfigError(_)), "{}", err);
    let err = WorkflowRunner::builder(graph(TWO_APPROVALS_WORKFLOW))
        .pause_repository(repository.clone())
        .resume(&first_pause, action_for(Some("end"), "approve"))
        .await
        .err()
        .expect("payload for a node that is not paused should be rejected");
    assert!(matches!(err, WorkflowError::ConfigError(_)), "{}", err);
    assert!(!repository.get(&first_pause).await.unwrap().unwrap().is_resumed());

    let handle = WorkflowRunner::builder(graph(TWO_APPROVALS_WORKFLOW))
        .pause_repository(repository.clone())
        .resume(&first_pause, action_for(Some("legal"), "approve"))
        .await
        .unwrap();
    let (second_pause, details) = expect_pause(&handle).await;
    assert_ne!(second_pause, first_pause);
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].node_id.as_deref(), Some("finance"));
    let events = handle.events();
    assert!(labels(&events).contains(&"NodeSucceeded(legal)".to_string()));
    assert!(!started(&events, "end"));

    // Only one node is left, so the target can be omitted.
    let handle = WorkflowRunner::builder(graph(TWO_APPROVALS_WORKFLOW))
        .pause_repository(repository)
        .resume(&second_pause, action_for(None, "ok"))
        .await
        .unwrap();
    let ExecutionStatus::Completed(outputs) = finish(&handle).await.0 else {
        panic!("expected completion");
    };
    assert_eq!(outputs.get("legal"), Some(&json!("approve")));
    assert_eq!(outputs.get("finance"), Some(&json!("ok")));
}
