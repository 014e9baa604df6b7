use std::collections::HashMap;

use serde_json::Value;

use crate::core::variable_pool::VariablePool;
use crate::dsl::schema::{NodeType, VariableMapping};
use crate::error::NodeError;
use crate::graph::NodeConfig;

/// Resolve `variable -> selector` mappings to plain JSON values.
/// Unset variables resolve to `null`.
pub(crate) fn resolve_mappings(
    mappings: &[VariableMapping],
    pool: &VariablePool,
) -> HashMap<String, Value> {
    mappings
        .iter()
        .map(|m| (m.variable.clone(), pool.get_value(&m.value_selector)))
        .collect()
}

/// Error for an executor handed the config of another node kind.
pub(crate) fn config_mismatch(node_id: &str, expected: NodeType, config: &NodeConfig) -> NodeError {
    NodeError::ConfigError(format!(
        "node '{}' expected {} config, got {}",
        node_id,
        expected,
        config.node_type()
    ))
}
