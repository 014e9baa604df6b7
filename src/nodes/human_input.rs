use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use tracing::info;

use crate::core::pause::{FormCreateParams, FormSubmission};
use crate::core::runtime_context::NodeContext;
use crate::core::runtime_state::RESUME_ACTION_VARIABLE;
use crate::core::variable_pool::VariablePool;
use crate::domain::execution::Segment;
use crate::domain::model::{PauseType, Selector};
use crate::dsl::schema::{HumanInputNodeData, NodeRunResult, NodeType};
use crate::error::NodeError;
use crate::graph::NodeConfig;
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::config_mismatch;
use crate::template::resolve_variables;

/// Suspends the run until a person picks one of the node's actions.
///
/// The first visit pauses. When the run is resumed the chosen action is
/// found at `(node_id, "__action")` and the submitted fields at
/// `(node_id, field)`; the action id becomes the edge handle.
pub struct HumanInputExecutor;

#[async_trait]
impl NodeExecutor for HumanInputExecutor {
    async fn execute(
        &self,
        node_id: &str,
        config: &NodeConfig,
        variable_pool: &VariablePool,
        context: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let NodeConfig::HumanInput(data) = config else {
            return Err(config_mismatch(node_id, NodeType::HumanInput, config));
        };

        let action_selector = Selector::new(node_id, RESUME_ACTION_VARIABLE);
        if let Some(action) = variable_pool.get(&action_selector) {
            let fields = |name: &str| variable_pool.get(&Selector::new(node_id, name)).cloned();
            return complete(data, &action.to_display_string(), fields);
        }

        let runtime = &context.runtime;
        let Some(forms) = runtime.form_repository.as_ref() else {
            let form_id = runtime.id_generator.next_id();
            info!(node_id, form_id = %form_id, "human input pending without a form repository");
            return Ok(pause(form_id, data.form_content.clone()));
        };

        let existing = forms
            .get_form(&runtime.workflow_execution_id, node_id)
            .await
            .map_err(|e| NodeError::HumanInputError(e.to_string()))?;
        if let Some(form) = existing {
            let submission = forms
                .get_submission(&form.id)
                .await
                .map_err(|e| NodeError::HumanInputError(e.to_string()))?;
            return match submission {
                Some(submission) => complete_from_submission(data, submission),
                None => Ok(pause(form.id, form.form_content)),
            };
        }

        let form_content = resolve_variables(&data.form_content, variable_pool)?;
        let form = forms
            .create_form(FormCreateParams {
                workflow_execution_id: runtime.workflow_execution_id.clone(),
                node_id: node_id.to_string(),
                form_content,
                inputs: data.inputs.clone(),
                user_actions: data.user_actions.clone(),
            })
            .await
            .map_err(|e| NodeError::HumanInputError(e.to_string()))?;
        info!(node_id, form_id = %form.id, "human input form created");
        Ok(pause(form.id, form.form_content))
    }
}

fn pause(form_id: String, form_content: String) -> NodeRunResult {
    let mut result = NodeRunResult::paused(PauseType::HumanInputPause {
        form_id: form_id.clone(),
    });
    result
        .process_data
        .insert("form".to_string(), json!({"form_id": form_id, "form_content": form_content}));
    result
}

fn complete_from_submission(
    data: &HumanInputNodeData,
    submission: FormSubmission,
) -> Result<NodeRunResult, NodeError> {
    let fields = |name: &str| submission.data.get(name).map(Segment::from_value);
    complete(data, &submission.action, fields)
}

/// Build the result for a chosen action; `field` looks up submitted values.
fn complete(
    data: &HumanInputNodeData,
    action: &str,
    field: impl Fn(&str) -> Option<Segment>,
) -> Result<NodeRunResult, NodeError> {
    if !data.user_actions.iter().any(|a| a.id == action) {
        return Err(NodeError::HumanInputError(format!(
            "unknown action '{}', expected one of [{}]",
            action,
            data.user_actions
                .iter()
                .map(|a| a.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let mut outputs = HashMap::new();
    let mut inputs: HashMap<String, Value> = HashMap::new();
    for input in &data.inputs {
        let name = input.output_variable_name.as_str();
        let value = match field(name).filter(|v| !v.is_none()) {
            Some(v) => v,
            None => match &input.default {
                Some(default) => Segment::from_value(default),
                None if input.required => {
                    return Err(NodeError::InputValidationError(format!(
                        "{} is required",
                        name
                    )))
                }
                None => Segment::None,
            },
        };
        inputs.insert(name.to_string(), value.to_value());
        outputs.insert(name.to_string(), value);
    }
    outputs.insert("action".to_string(), Segment::String(action.to_string()));

    Ok(NodeRunResult {
        inputs,
        outputs,
        edge_source_handle: action.to_string(),
        ..Default::default()
    })
}
