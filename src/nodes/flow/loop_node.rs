//! Loop Node executor.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::core::runtime_context::NodeContext;
use crate::core::variable_pool::VariablePool;
use crate::domain::execution::Segment;
use crate::domain::model::{Case, Selector};
use crate::dsl::schema::{NodeRunResult, NodeType};
use crate::error::NodeError;
use crate::evaluator::evaluate_case;
use crate::graph::{LoopNodeConfig, NodeConfig};
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::config_mismatch;

use super::{resolve_sub_graph_runner, usage};

/// Runs the body up to `loop_count` times.
///
/// Loop variables live at `(node_id, label)` and are carried from one round
/// to the next through the End outputs of the body. Break conditions are
/// checked before every round against the latest state.
pub struct LoopNodeExecutor;

#[async_trait]
impl NodeExecutor for LoopNodeExecutor {
    async fn execute(
        &self,
        node_id: &str,
        config: &NodeConfig,
        variable_pool: &VariablePool,
        context: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let NodeConfig::Loop(config) = config else {
            return Err(config_mismatch(node_id, NodeType::Loop, config));
        };

        let parent = Arc::new(variable_pool.clone());
        let runner = resolve_sub_graph_runner(&context.runtime);
        let break_case = Case {
            case_id: "break".to_string(),
            logical_operator: config.data.logical_operator,
            conditions: config.data.break_conditions.clone(),
        };

        let mut loop_vars = initial_loop_vars(config, variable_pool);
        let mut last_pool: Option<Arc<VariablePool>> = None;
        let mut rounds = 0u32;
        let mut total_tokens = 0;

        while rounds < config.data.loop_count {
            if context.is_cancelled() {
                return Err(NodeError::Cancelled);
            }

            if !break_case.conditions.is_empty() {
                let base = last_pool.clone().unwrap_or_else(|| parent.clone());
                let mut view = VariablePool::new_child(base);
                for (label, value) in &loop_vars {
                    view.set(&Selector::new(node_id, label.as_str()), value.clone());
                }
                if evaluate_case(&break_case, &view)?.matched {
                    debug!(node_id, rounds, "loop break condition met");
                    break;
                }
            }

            let mut scope: Vec<(Selector, Segment)> = loop_vars
                .iter()
                .map(|(label, value)| (Selector::new(node_id, label.as_str()), value.clone()))
                .collect();
            scope.push((
                Selector::new(node_id, "index"),
                Segment::Integer(rounds as i64),
            ));

            let output = runner
                .run_sub_graph(config.graph.clone(), parent.clone(), scope, context)
                .await
                .map_err(|e| NodeError::SubGraphError(format!("loop round {} failed: {}", rounds, e)))?;
            rounds += 1;
            total_tokens += output.total_tokens;

            for (label, value) in loop_vars.iter_mut() {
                if let Some(next) = output.outputs.get(label.as_str()) {
                    *value = Segment::from_value(next);
                }
            }
            last_pool = Some(Arc::new(output.pool));
        }

        let mut outputs: HashMap<String, Segment> = loop_vars.into_iter().collect();
        outputs.insert("loop_round".to_string(), Segment::Integer(rounds as i64));

        let mut metadata = HashMap::new();
        metadata.insert("loop_round".to_string(), json!(rounds));

        Ok(NodeRunResult {
            outputs,
            metadata,
            llm_usage: usage(total_tokens),
            ..Default::default()
        })
    }
}

/// Starting values, in declaration order.
fn initial_loop_vars(config: &LoopNodeConfig, pool: &VariablePool) -> Vec<(String, Segment)> {
    config
        .data
        .loop_variables
        .iter()
        .map(|var| {
            let value = match &var.value_selector {
                Some(selector) => pool.get(selector).cloned().unwrap_or(Segment::None),
                None => Segment::from_value(&var.value),
            };
            (var.label.clone(), value)
        })
        .collect()
}
