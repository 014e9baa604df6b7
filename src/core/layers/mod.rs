//! Cross-cutting observers attached to a whole run.
//!
//! Layers run in registration order. An `on_event` or `on_graph_end` failure
//! is logged and skipped; an `on_graph_start` failure of a mandatory layer
//! aborts the run before any node executes.

mod sandbox;
mod tracing_layer;
mod trigger_log;

use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;

use crate::core::event_bus::EngineEvent;
use crate::core::runtime_state::GraphRuntimeState;
use crate::error::WorkflowError;

pub use sandbox::{InMemorySandboxRegistry, SandboxHandle, SandboxLayer, SandboxRegistry};
pub use tracing_layer::TracingLayer;
pub use trigger_log::{MemoryTriggerLogSink, TriggerLogLayer, TriggerLogRecord, TriggerLogSink};

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("initialization failed: {0}")]
    Initialization(String),
    #[error("event handling failed: {0}")]
    Event(String),
    #[error("shutdown failed: {0}")]
    Shutdown(String),
    #[error("layer panicked: {0}")]
    Panicked(String),
}

/// Run one layer hook, turning a panic into [`LayerError::Panicked`].
pub(crate) async fn guarded<F>(hook: F) -> Result<(), LayerError>
where
    F: Future<Output = Result<(), LayerError>>,
{
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(LayerError::Panicked(
            panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string()),
        )),
    }
}

#[async_trait]
pub trait Layer: Send + Sync {
    fn name(&self) -> &str;

    /// A mandatory layer's start failure fails the run.
    fn is_mandatory(&self) -> bool {
        false
    }

    async fn on_graph_start(&self, _state: &GraphRuntimeState) -> Result<(), LayerError> {
        Ok(())
    }

    async fn on_event(
        &self,
        _event: &EngineEvent,
        _state: &GraphRuntimeState,
    ) -> Result<(), LayerError> {
        Ok(())
    }

    async fn on_graph_end(
        &self,
        _state: &GraphRuntimeState,
        _error: Option<&WorkflowError>,
    ) -> Result<(), LayerError> {
        Ok(())
    }
}
