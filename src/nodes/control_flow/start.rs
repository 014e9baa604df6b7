use async_trait::async_trait;
use std::collections::HashMap;

use crate::core::runtime_context::NodeContext;
use crate::core::variable_pool::VariablePool;
use crate::domain::execution::Segment;
use crate::domain::model::Selector;
use crate::dsl::schema::{NodeRunResult, NodeType, StartVariable};
use crate::error::NodeError;
use crate::graph::NodeConfig;
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::config_mismatch;

/// Root node executor for `start` and `event-source`.
///
/// Run inputs (or the trigger payload) are written to `(node_id, variable)`
/// before the run begins; this node applies defaults, validates them and
/// republishes them as its outputs.
pub struct StartNodeExecutor;

#[async_trait]
impl NodeExecutor for StartNodeExecutor {
    async fn execute(
        &self,
        node_id: &str,
        config: &NodeConfig,
        variable_pool: &VariablePool,
        _context: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let variables = match config {
            NodeConfig::Start(data) => &data.variables,
            NodeConfig::EventSource(data) => &data.variables,
            other => return Err(config_mismatch(node_id, NodeType::Start, other)),
        };

        let mut inputs = HashMap::new();
        let mut outputs = HashMap::new();
        for var in variables {
            let value = resolve_input(node_id, var, variable_pool)?;
            inputs.insert(var.variable.clone(), value.to_value());
            outputs.insert(var.variable.clone(), value);
        }

        Ok(NodeRunResult {
            inputs,
            outputs,
            ..Default::default()
        })
    }
}

fn resolve_input(
    node_id: &str,
    var: &StartVariable,
    pool: &VariablePool,
) -> Result<Segment, NodeError> {
    let provided = pool
        .get(&Selector::new(node_id, var.variable.as_str()))
        .filter(|s| !s.is_none())
        .cloned();
    let value = match provided {
        Some(v) => v,
        None => match &var.default {
            Some(default) => Segment::from_value(default),
            None if var.required => {
                return Err(NodeError::InputValidationError(format!(
                    "missing required input '{}'",
                    var.variable
                )))
            }
            None => return Ok(Segment::None),
        },
    };

    if var.var_type == "number" && value.as_f64().is_none() {
        return Err(NodeError::InputValidationError(format!(
            "input '{}' must be a number, got {}",
            var.variable,
            value.type_name()
        )));
    }
    if let (Some(max), Segment::String(s)) = (var.max_length, &value) {
        if s.chars().count() > max {
            return Err(NodeError::InputValidationError(format!(
                "input '{}' is longer than {} characters",
                var.variable, max
            )));
        }
    }
    if let Some(options) = var.options.as_ref().filter(|o| !o.is_empty()) {
        let shown = value.to_display_string();
        if !options.contains(&shown) {
            return Err(NodeError::InputValidationError(format!(
                "input '{}' must be one of {:?}, got '{}'",
                var.variable, options, shown
            )));
        }
    }
    Ok(value)
}
