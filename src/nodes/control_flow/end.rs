use async_trait::async_trait;
use std::collections::HashMap;

use crate::core::runtime_context::NodeContext;
use crate::core::variable_pool::VariablePool;
use crate::domain::execution::Segment;
use crate::dsl::schema::{NodeRunResult, NodeType};
use crate::error::NodeError;
use crate::graph::NodeConfig;
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::config_mismatch;

/// Collects the declared output variables; they become run outputs.
pub struct EndNodeExecutor;

#[async_trait]
impl NodeExecutor for EndNodeExecutor {
    async fn execute(
        &self,
        node_id: &str,
        config: &NodeConfig,
        variable_pool: &VariablePool,
        _context: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let NodeConfig::End(data) = config else {
            return Err(config_mismatch(node_id, NodeType::End, config));
        };

        let mut inputs = HashMap::new();
        let mut outputs = HashMap::new();
        for ov in &data.outputs {
            let value = variable_pool
                .get(&ov.value_selector)
                .cloned()
                .unwrap_or(Segment::None);
            inputs.insert(ov.variable.clone(), value.to_value());
            outputs.insert(ov.variable.clone(), value);
        }

        Ok(NodeRunResult {
            inputs,
            outputs,
            ..Default::default()
        })
    }
}
