use async_trait::async_trait;

use super::{Layer, LayerError};
use crate::core::event_bus::EngineEvent;
use crate::core::runtime_state::GraphRuntimeState;
use crate::error::WorkflowError;

/// Forwards every engine event to `tracing`.
#[derive(Debug, Default)]
pub struct TracingLayer;

#[async_trait]
impl Layer for TracingLayer {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn on_graph_start(&self, state: &GraphRuntimeState) -> Result<(), LayerError> {
        tracing::info!(
            workflow_execution_id = %state.workflow_execution_id,
            workflow_id = %state.identity.workflow_id,
            call_depth = state.call_depth,
            "workflow run started"
        );
        Ok(())
    }

    async fn on_event(
        &self,
        event: &EngineEvent,
        state: &GraphRuntimeState,
    ) -> Result<(), LayerError> {
        tracing::debug!(
            workflow_execution_id = %state.workflow_execution_id,
            event = event.event.name(),
            node_id = event.event.node_id().unwrap_or(""),
            "engine event"
        );
        Ok(())
    }

    async fn on_graph_end(
        &self,
        state: &GraphRuntimeState,
        error: Option<&WorkflowError>,
    ) -> Result<(), LayerError> {
        match error {
            Some(e) => tracing::warn!(
                workflow_execution_id = %state.workflow_execution_id,
                error = %e,
                "workflow run ended with error"
            ),
            None => tracing::info!(
                workflow_execution_id = %state.workflow_execution_id,
                total_tokens = state.total_tokens(),
                steps = state.node_run_steps(),
                "workflow run ended"
            ),
        }
        Ok(())
    }
}
