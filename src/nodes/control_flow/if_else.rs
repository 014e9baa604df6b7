use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::core::runtime_context::NodeContext;
use crate::core::variable_pool::VariablePool;
use crate::domain::execution::Segment;
use crate::domain::model::Case;
use crate::dsl::schema::{NodeRunResult, NodeType};
use crate::error::{ErrorCode, ErrorContext, NodeError};
use crate::evaluator::evaluate_cases;
use crate::graph::NodeConfig;
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::config_mismatch;

/// Multi-case branch node. The selected case id is the edge handle; no
/// match routes to `"false"`.
pub struct IfElseNodeExecutor;

#[async_trait]
impl NodeExecutor for IfElseNodeExecutor {
    async fn execute(
        &self,
        node_id: &str,
        config: &NodeConfig,
        variable_pool: &VariablePool,
        _context: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let NodeConfig::IfElse(data) = config else {
            return Err(config_mismatch(node_id, NodeType::IfElse, config));
        };

        let inputs = condition_inputs(&data.cases, variable_pool);
        let outcome = match evaluate_cases(&data.cases, variable_pool) {
            Ok(outcome) => outcome,
            Err(e) => {
                let mut metadata = e
                    .error_context()
                    .and_then(|c| c.metadata.clone())
                    .unwrap_or_else(|| json!({}));
                if let Some(obj) = metadata.as_object_mut() {
                    obj.insert("inputs".to_string(), json!(inputs));
                }
                let message = e.to_string();
                return Err(e.with_context(
                    ErrorContext::non_retryable(ErrorCode::ConditionError, message)
                        .with_metadata(metadata),
                ));
            }
        };

        let matched = outcome.evaluations.iter().any(|e| e.matched);
        let mut outputs = HashMap::new();
        outputs.insert("result".to_string(), Segment::Boolean(matched));
        outputs.insert(
            "selected_case_id".to_string(),
            Segment::String(outcome.selected.clone()),
        );

        let mut process_data = HashMap::new();
        process_data.insert("condition_results".to_string(), json!(outcome.evaluations));

        Ok(NodeRunResult {
            inputs,
            process_data,
            outputs,
            edge_source_handle: outcome.selected,
            ..Default::default()
        })
    }
}

/// Current values of every variable the cases read, keyed `node.var`.
fn condition_inputs(cases: &[Case], pool: &VariablePool) -> HashMap<String, Value> {
    cases
        .iter()
        .flat_map(|c| c.conditions.iter())
        .map(|cond| {
            (
                cond.variable_selector.to_string(),
                pool.get_value(&cond.variable_selector),
            )
        })
        .collect()
}
