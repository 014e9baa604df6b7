use async_trait::async_trait;
use std::collections::HashMap;

use crate::core::runtime_context::NodeContext;
use crate::core::variable_pool::VariablePool;
use crate::domain::execution::Segment;
use crate::dsl::schema::{NodeRunResult, NodeType};
use crate::error::NodeError;
use crate::graph::NodeConfig;
use crate::nodes::executor::NodeExecutor;
use crate::nodes::utils::{config_mismatch, resolve_mappings};
use crate::template::TemplateEngine;

/// Template transform node executor.
///
/// Renders `template` over the mapped variables and writes the text to
/// `output`. Output longer than the limit fails the node; it is never
/// truncated.
pub struct TemplateTransformExecutor {
    lenient: TemplateEngine,
    strict: TemplateEngine,
}

impl TemplateTransformExecutor {
    pub fn new() -> Self {
        TemplateTransformExecutor {
            lenient: TemplateEngine::new(),
            strict: TemplateEngine::with_strict(true),
        }
    }
}

impl Default for TemplateTransformExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for TemplateTransformExecutor {
    async fn execute(
        &self,
        node_id: &str,
        config: &NodeConfig,
        variable_pool: &VariablePool,
        context: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let NodeConfig::TemplateTransform(data) = config else {
            return Err(config_mismatch(node_id, NodeType::TemplateTransform, config));
        };
        let engine_config = &context.runtime.config;

        let variables = resolve_mappings(&data.variables, variable_pool);
        let engine = if engine_config.strict_template {
            &self.strict
        } else {
            &self.lenient
        };
        let rendered = engine.render_template(&data.template, &variables)?;

        // Counted in characters, not bytes.
        let limit = data
            .max_output_length
            .unwrap_or(engine_config.template_max_output_length);
        let length = rendered.chars().count();
        if length > limit {
            return Err(NodeError::OutputTooLong { length, limit });
        }

        let mut outputs = HashMap::new();
        outputs.insert("output".to_string(), Segment::String(rendered));

        Ok(NodeRunResult {
            inputs: variables,
            outputs,
            ..Default::default()
        })
    }
}
