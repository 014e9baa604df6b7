use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Layer, LayerError};
use crate::core::runtime_state::GraphRuntimeState;
use crate::error::WorkflowError;

/// A provisioned execution sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: String,
    pub workflow_execution_id: String,
}

/// Provisions sandboxes for runs. Injected into [`SandboxLayer`].
#[async_trait]
pub trait SandboxRegistry: Send + Sync {
    async fn acquire(&self, workflow_execution_id: &str) -> Result<SandboxHandle, LayerError>;
    async fn release(&self, handle: &SandboxHandle) -> Result<(), LayerError>;
}

/// Bounded registry of in-process sandboxes.
pub struct InMemorySandboxRegistry {
    capacity: usize,
    active: Mutex<HashMap<String, SandboxHandle>>,
}

impl InMemorySandboxRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

#[async_trait]
impl SandboxRegistry for InMemorySandboxRegistry {
    async fn acquire(&self, workflow_execution_id: &str) -> Result<SandboxHandle, LayerError> {
        let mut active = self.active.lock();
        if active.len() >= self.capacity {
            return Err(LayerError::Initialization(format!(
                "sandbox capacity {} exhausted",
                self.capacity
            )));
        }
        let handle = SandboxHandle {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_execution_id: workflow_execution_id.to_string(),
        };
        active.insert(handle.id.clone(), handle.clone());
        Ok(handle)
    }

    async fn release(&self, handle: &SandboxHandle) -> Result<(), LayerError> {
        match self.active.lock().remove(&handle.id) {
            Some(_) => Ok(()),
            None => Err(LayerError::Shutdown(format!("unknown sandbox {}", handle.id))),
        }
    }
}

/// Holds a sandbox for the lifetime of a run.
pub struct SandboxLayer {
    registry: Arc<dyn SandboxRegistry>,
    mandatory: bool,
    handle: Mutex<Option<SandboxHandle>>,
}

impl SandboxLayer {
    pub fn new(registry: Arc<dyn SandboxRegistry>) -> Self {
        Self {
            registry,
            mandatory: true,
            handle: Mutex::new(None),
        }
    }

    /// Let the run continue without a sandbox when provisioning fails.
    pub fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }

    pub fn handle(&self) -> Option<SandboxHandle> {
        self.handle.lock().clone()
    }
}

#[async_trait]
impl Layer for SandboxLayer {
    fn name(&self) -> &str {
        "sandbox"
    }

    fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    async fn on_graph_start(&self, state: &GraphRuntimeState) -> Result<(), LayerError> {
        let handle = self.registry.acquire(&state.workflow_execution_id).await?;
        tracing::debug!(sandbox_id = %handle.id, "sandbox acquired");
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    async fn on_graph_end(
        &self,
        _state: &GraphRuntimeState,
        _error: Option<&WorkflowError>,
    ) -> Result<(), LayerError> {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => self.registry.release(&handle).await,
            None => Ok(()),
        }
    }
}
