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
use crate::template::{resolve_variables, TemplateEngine};

/// Renders the answer text and streams it as a single chunk.
///
/// `{{#node.var#}}` references are substituted first; when the node declares
/// `variables`, the result is then rendered as a Jinja template over them.
pub struct AnswerNodeExecutor {
    engine: TemplateEngine,
}

impl AnswerNodeExecutor {
    pub fn new() -> Self {
        Self {
            engine: TemplateEngine::new(),
        }
    }
}

impl Default for AnswerNodeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for AnswerNodeExecutor {
    async fn execute(
        &self,
        node_id: &str,
        config: &NodeConfig,
        variable_pool: &VariablePool,
        context: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let NodeConfig::Answer(data) = config else {
            return Err(config_mismatch(node_id, NodeType::Answer, config));
        };

        let mut answer = resolve_variables(&data.answer, variable_pool)?;
        let variables = resolve_mappings(&data.variables, variable_pool);
        if !variables.is_empty() {
            answer = self.engine.render_template(&answer, &variables)?;
        }

        context.emit_chunk(answer.clone(), true);

        let mut outputs = HashMap::new();
        outputs.insert("answer".to_string(), Segment::String(answer));

        Ok(NodeRunResult {
            inputs: variables,
            outputs,
            ..Default::default()
        })
    }
}
